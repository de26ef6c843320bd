//! Quantization and dequantization for model weights
//!
//! Implements the block formats a container may declare:
//! - `F32` / `F16`: plain floats
//! - `Q4_0`, `Q4_1`, `Q5_0`, `Q5_1`, `Q8_0`: 32-element blocks with f16 scales
//! - `Q2_K`, `Q4_K`, `Q5_K`, `Q6_K`: 256-element super-blocks
//!
//! ## `Q4_K` Format
//!
//! `Q4_K` uses super-blocks of 256 values divided into 8 sub-blocks of 32:
//! - 1 half-precision super-block scale (`d`)
//! - 1 half-precision super-block min (`dmin`)
//! - 12 bytes of 6-bit sub-block scales and mins (packed)
//! - 128 bytes of 4-bit quantized values
//! - Dequantization: `value = d * scale * q - dmin * min`
//!
//! All scale conversions go through [`f16_to_f32`], which is bit-exact for
//! normals, subnormals, infinities and NaN. A truncated conversion would skew
//! every element of a block by the same factor.

use crate::error::{Result, VargateError};

pub mod dequant;
pub mod encode;
pub mod types;

pub use dequant::{
    dequantize_f16, dequantize_f32, dequantize_q2_k, dequantize_q4_0, dequantize_q4_1,
    dequantize_q4_k, dequantize_q5_0, dequantize_q5_1, dequantize_q5_k, dequantize_q6_k,
    dequantize_q8_0, extract_scale_min,
};
pub use encode::{quantize, quantize_f16, quantize_q4_0, quantize_q4_k, quantize_q6_k, quantize_q8_0};
pub use types::{QuantKind, BLOCK_SIZE, K_SCALE_SIZE, QK_K};

/// Pre-computed f16 to f32 lookup table (65536 entries = 256KB)
///
/// Built once on first access from `half`'s conversion; immutable thereafter.
static F16_TO_F32_LUT: std::sync::LazyLock<Box<[f32]>> = std::sync::LazyLock::new(|| {
    (0..=u16::MAX)
        .map(|bits| half::f16::from_bits(bits).to_f32())
        .collect()
});

/// Convert IEEE 754 half-precision bits to single precision
///
/// Exact for every input: sign, 5-bit exponent and 10-bit mantissa are widened
/// without rounding, subnormals are normalized, infinities stay infinite and
/// NaN stays NaN.
#[inline]
pub fn f16_to_f32(bits: u16) -> f32 {
    F16_TO_F32_LUT[bits as usize]
}

/// Read a little-endian f16 from the first two bytes of `bytes`
#[inline]
pub(crate) fn read_f16(bytes: &[u8]) -> f32 {
    f16_to_f32(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Decode a tensor's raw byte span into `n_elements` f32 values
///
/// # Errors
///
/// Returns [`VargateError::DecodeError`] if `n_elements` is not a whole number
/// of blocks for `kind`, or if `data.len()` differs from the block arithmetic
/// (`blocks × block_bytes`).
pub fn dequantize(kind: QuantKind, data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    let expected = kind
        .byte_len(n_elements)
        .ok_or_else(|| VargateError::DecodeError {
            kind,
            reason: format!(
                "{} elements is not a whole number of {}-element blocks",
                n_elements,
                kind.block_elems()
            ),
        })?;

    if data.len() != expected {
        return Err(VargateError::DecodeError {
            kind,
            reason: format!(
                "byte span is {} bytes, {} elements need {} blocks of {} bytes = {}",
                data.len(),
                n_elements,
                n_elements / kind.block_elems(),
                kind.block_bytes(),
                expected
            ),
        });
    }

    let values = match kind {
        QuantKind::F32 => dequantize_f32(data)?,
        QuantKind::F16 => dequantize_f16(data)?,
        QuantKind::Q4_0 => dequantize_q4_0(data)?,
        QuantKind::Q4_1 => dequantize_q4_1(data)?,
        QuantKind::Q5_0 => dequantize_q5_0(data)?,
        QuantKind::Q5_1 => dequantize_q5_1(data)?,
        QuantKind::Q8_0 => dequantize_q8_0(data)?,
        QuantKind::Q2_K => dequantize_q2_k(data)?,
        QuantKind::Q4_K => dequantize_q4_k(data)?,
        QuantKind::Q5_K => dequantize_q5_k(data)?,
        QuantKind::Q6_K => dequantize_q6_k(data)?,
    };
    debug_assert_eq!(values.len(), n_elements);
    Ok(values)
}

/// Decode a tensor given its on-disk kind id
///
/// # Errors
///
/// Returns [`VargateError::FormatError`] for an unknown kind id, otherwise the
/// errors of [`dequantize`].
pub fn dequantize_by_id(kind_id: u32, data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    let kind = QuantKind::from_id(kind_id)
        .ok_or_else(|| VargateError::format(format!("unsupported quantization kind id {kind_id}")))?;
    dequantize(kind, data, n_elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-level f16 -> f32 widening, written independently of `half`
    fn reference_f16_bits(h: u16) -> u32 {
        let sign = u32::from(h >> 15) << 31;
        let exp = u32::from((h >> 10) & 0x1F);
        let man = u32::from(h & 0x3FF);
        match (exp, man) {
            (0, 0) => sign,
            (0, _) => {
                // Subnormal: value = man * 2^-24, normalize the mantissa
                let mut e: i32 = -14;
                let mut m = man;
                while m & 0x400 == 0 {
                    m <<= 1;
                    e -= 1;
                }
                let m = m & 0x3FF;
                sign | (((e + 127) as u32) << 23) | (m << 13)
            },
            (31, _) => sign | 0x7F80_0000 | (man << 13),
            _ => sign | ((exp + 112) << 23) | (man << 13),
        }
    }

    #[test]
    fn test_f16_conversion_is_bit_exact_for_all_inputs() {
        for h in 0..=u16::MAX {
            let got = f16_to_f32(h);
            let want = f32::from_bits(reference_f16_bits(h));
            if want.is_nan() {
                assert!(got.is_nan(), "0x{h:04X} should be NaN");
                assert_eq!(got.is_sign_negative(), want.is_sign_negative());
            } else {
                assert_eq!(got.to_bits(), want.to_bits(), "0x{h:04X}");
            }
        }
    }

    #[test]
    fn test_f16_special_values() {
        assert_eq!(f16_to_f32(0x3C00), 1.0);
        assert_eq!(f16_to_f32(0xBC00), -1.0);
        assert_eq!(f16_to_f32(0x7BFF), 65504.0);
        assert_eq!(f16_to_f32(0x0001), 2.0f32.powi(-24));
        assert_eq!(f16_to_f32(0x03FF), 1023.0 * 2.0f32.powi(-24));
        assert_eq!(f16_to_f32(0x8000).to_bits(), (-0.0f32).to_bits());
        assert_eq!(f16_to_f32(0x7C00), f32::INFINITY);
        assert_eq!(f16_to_f32(0xFC00), f32::NEG_INFINITY);
        assert!(f16_to_f32(0x7E00).is_nan());
    }

    #[test]
    fn test_q4_0_span_of_144_bytes_is_256_elements() {
        let data = vec![0u8; 144];
        let out = dequantize(QuantKind::Q4_0, &data, 256).unwrap();
        assert_eq!(out.len(), 256);
    }

    #[test]
    fn test_q4_k_two_super_blocks_decode_to_512() {
        let data = vec![0u8; 288];
        let out = dequantize(QuantKind::Q4_K, &data, 512).unwrap();
        assert_eq!(out.len(), 512);
    }

    #[test]
    fn test_off_by_one_spans_fail() {
        for len in [143usize, 145] {
            let err = dequantize(QuantKind::Q4_0, &vec![0u8; len], 256).unwrap_err();
            assert!(matches!(err, VargateError::DecodeError { kind: QuantKind::Q4_0, .. }));
        }
        for len in [287usize, 289] {
            assert!(dequantize(QuantKind::Q4_K, &vec![0u8; len], 512).is_err());
        }
    }

    #[test]
    fn test_element_count_not_block_multiple() {
        let err = dequantize(QuantKind::Q4_K, &[0u8; 144], 200).unwrap_err();
        assert!(matches!(err, VargateError::DecodeError { .. }));
    }

    #[test]
    fn test_unknown_kind_id() {
        let err = dequantize_by_id(42, &[], 0).unwrap_err();
        assert!(matches!(err, VargateError::FormatError { .. }));
    }

    #[test]
    fn test_dispatch_matches_direct_call() {
        let mut block = vec![0x00, 0x3C];
        block.extend(0u8..32);
        assert_eq!(
            dequantize(QuantKind::Q8_0, &block, 32).unwrap(),
            dequantize_q8_0(&block).unwrap()
        );
    }
}
