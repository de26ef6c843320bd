//! Per-kind dequantization kernels
//!
//! Byte offsets and nibble ordering follow the reference block layouts
//! bit-for-bit. A deviation here does not crash: it silently produces wrong
//! weights, which is why every kernel is pinned by literal reference vectors
//! in the tests below.

use super::types::{QuantKind, BLOCK_SIZE, K_SCALE_SIZE, QK_K};
use super::{f16_to_f32, read_f16};
use crate::error::{Result, VargateError};

/// Check that `data` is a whole number of blocks and return the block count
fn block_count(kind: QuantKind, data: &[u8]) -> Result<usize> {
    let block_bytes = kind.block_bytes();
    if data.len() % block_bytes != 0 {
        return Err(VargateError::DecodeError {
            kind,
            reason: format!(
                "data length {} is not a multiple of block size {}",
                data.len(),
                block_bytes
            ),
        });
    }
    Ok(data.len() / block_bytes)
}

/// Decode little-endian `F32` values
pub fn dequantize_f32(data: &[u8]) -> Result<Vec<f32>> {
    block_count(QuantKind::F32, data)?;
    Ok(data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Decode little-endian `F16` values
pub fn dequantize_f16(data: &[u8]) -> Result<Vec<f32>> {
    block_count(QuantKind::F16, data)?;
    Ok(data
        .chunks_exact(2)
        .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
        .collect())
}

/// Dequantize `Q4_0` blocks
///
/// Layout: f16 `d`, then 16 bytes. Element `j` is the low nibble of byte `j`,
/// element `j + 16` its high nibble; both are offset by -8.
pub fn dequantize_q4_0(data: &[u8]) -> Result<Vec<f32>> {
    let num_blocks = block_count(QuantKind::Q4_0, data)?;
    let mut result = vec![0.0f32; num_blocks * BLOCK_SIZE];

    for (block, out) in data
        .chunks_exact(QuantKind::Q4_0.block_bytes())
        .zip(result.chunks_exact_mut(BLOCK_SIZE))
    {
        let d = read_f16(&block[0..2]);
        for (j, &byte) in block[2..18].iter().enumerate() {
            let low = i16::from(byte & 0x0F) - 8;
            let high = i16::from(byte >> 4) - 8;
            out[j] = d * f32::from(low);
            out[j + 16] = d * f32::from(high);
        }
    }

    Ok(result)
}

/// Dequantize `Q4_1` blocks: `value = d * q + m`
pub fn dequantize_q4_1(data: &[u8]) -> Result<Vec<f32>> {
    let num_blocks = block_count(QuantKind::Q4_1, data)?;
    let mut result = vec![0.0f32; num_blocks * BLOCK_SIZE];

    for (block, out) in data
        .chunks_exact(QuantKind::Q4_1.block_bytes())
        .zip(result.chunks_exact_mut(BLOCK_SIZE))
    {
        let d = read_f16(&block[0..2]);
        let m = read_f16(&block[2..4]);
        for (j, &byte) in block[4..20].iter().enumerate() {
            out[j] = d * f32::from(byte & 0x0F) + m;
            out[j + 16] = d * f32::from(byte >> 4) + m;
        }
    }

    Ok(result)
}

/// Dequantize `Q5_0` blocks
///
/// Layout: f16 `d`, u32 `qh` (fifth bits), 16 bytes of nibbles. Bit `j` of
/// `qh` extends element `j`, bit `j + 16` extends element `j + 16`.
pub fn dequantize_q5_0(data: &[u8]) -> Result<Vec<f32>> {
    let num_blocks = block_count(QuantKind::Q5_0, data)?;
    let mut result = vec![0.0f32; num_blocks * BLOCK_SIZE];

    for (block, out) in data
        .chunks_exact(QuantKind::Q5_0.block_bytes())
        .zip(result.chunks_exact_mut(BLOCK_SIZE))
    {
        let d = read_f16(&block[0..2]);
        let qh = u32::from_le_bytes([block[2], block[3], block[4], block[5]]);
        for (j, &byte) in block[6..22].iter().enumerate() {
            let lo = (byte & 0x0F) | ((((qh >> j) & 1) as u8) << 4);
            let hi = (byte >> 4) | ((((qh >> (j + 16)) & 1) as u8) << 4);
            out[j] = d * f32::from(i16::from(lo) - 16);
            out[j + 16] = d * f32::from(i16::from(hi) - 16);
        }
    }

    Ok(result)
}

/// Dequantize `Q5_1` blocks: `value = d * q + m` with 5-bit `q`
pub fn dequantize_q5_1(data: &[u8]) -> Result<Vec<f32>> {
    let num_blocks = block_count(QuantKind::Q5_1, data)?;
    let mut result = vec![0.0f32; num_blocks * BLOCK_SIZE];

    for (block, out) in data
        .chunks_exact(QuantKind::Q5_1.block_bytes())
        .zip(result.chunks_exact_mut(BLOCK_SIZE))
    {
        let d = read_f16(&block[0..2]);
        let m = read_f16(&block[2..4]);
        let qh = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        for (j, &byte) in block[8..24].iter().enumerate() {
            let lo = (byte & 0x0F) | ((((qh >> j) & 1) as u8) << 4);
            let hi = (byte >> 4) | ((((qh >> (j + 16)) & 1) as u8) << 4);
            out[j] = d * f32::from(lo) + m;
            out[j + 16] = d * f32::from(hi) + m;
        }
    }

    Ok(result)
}

/// Dequantize `Q8_0` blocks: `value = d * q` with signed 8-bit `q`
pub fn dequantize_q8_0(data: &[u8]) -> Result<Vec<f32>> {
    let num_blocks = block_count(QuantKind::Q8_0, data)?;
    let mut result = Vec::with_capacity(num_blocks * BLOCK_SIZE);

    for block in data.chunks_exact(QuantKind::Q8_0.block_bytes()) {
        let d = read_f16(&block[0..2]);
        result.extend(
            block[2..34]
                .iter()
                .map(|&b| d * f32::from(i8::from_le_bytes([b]))),
        );
    }

    Ok(result)
}

/// Unpack the 6-bit scale and min of sub-block `j` (0..8)
///
/// Sub-blocks 0..4 use the low 6 bits of bytes `j` and `j + 4`. Sub-blocks
/// 4..8 take their low nibbles from bytes 8..12 and their top two bits from
/// the high bits of bytes `j - 4` (scale) and `j` (min).
#[inline]
pub fn extract_scale_min(scales: &[u8; K_SCALE_SIZE], j: usize) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        let sc = (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (sc, m)
    }
}

fn read_k_scales(bytes: &[u8]) -> [u8; K_SCALE_SIZE] {
    let mut scales = [0u8; K_SCALE_SIZE];
    scales.copy_from_slice(&bytes[..K_SCALE_SIZE]);
    scales
}

/// Dequantize `Q4_K` super-blocks
///
/// Layout: f16 `d`, f16 `dmin`, 12 bytes of packed scales, 128 bytes of
/// nibbles. Each 64-element chunk reads 32 payload bytes: low nibbles feed
/// sub-block `2c`, high nibbles sub-block `2c + 1`.
/// `value = d * scale * q - dmin * min`.
pub fn dequantize_q4_k(data: &[u8]) -> Result<Vec<f32>> {
    let num_super_blocks = block_count(QuantKind::Q4_K, data)?;
    let mut result = vec![0.0f32; num_super_blocks * QK_K];

    for (sb, out) in data
        .chunks_exact(QuantKind::Q4_K.block_bytes())
        .zip(result.chunks_exact_mut(QK_K))
    {
        let d = read_f16(&sb[0..2]);
        let dmin = read_f16(&sb[2..4]);
        let scales = read_k_scales(&sb[4..16]);
        let qs = &sb[16..144];

        for chunk in 0..4 {
            let q = &qs[chunk * 32..chunk * 32 + 32];
            let (sc1, m1) = extract_scale_min(&scales, 2 * chunk);
            let (sc2, m2) = extract_scale_min(&scales, 2 * chunk + 1);
            let d1 = d * f32::from(sc1);
            let dm1 = dmin * f32::from(m1);
            let d2 = d * f32::from(sc2);
            let dm2 = dmin * f32::from(m2);

            let base = chunk * 64;
            for (l, &byte) in q.iter().enumerate() {
                out[base + l] = d1 * f32::from(byte & 0x0F) - dm1;
                out[base + 32 + l] = d2 * f32::from(byte >> 4) - dm2;
            }
        }
    }

    Ok(result)
}

/// Dequantize `Q5_K` super-blocks
///
/// Same scale packing as `Q4_K`, plus 32 bytes of fifth bits: chunk `c` uses
/// bit `2c` of `qh[l]` for the low nibble and bit `2c + 1` for the high one.
pub fn dequantize_q5_k(data: &[u8]) -> Result<Vec<f32>> {
    let num_super_blocks = block_count(QuantKind::Q5_K, data)?;
    let mut result = vec![0.0f32; num_super_blocks * QK_K];

    for (sb, out) in data
        .chunks_exact(QuantKind::Q5_K.block_bytes())
        .zip(result.chunks_exact_mut(QK_K))
    {
        let d = read_f16(&sb[0..2]);
        let dmin = read_f16(&sb[2..4]);
        let scales = read_k_scales(&sb[4..16]);
        let qh = &sb[16..48];
        let qs = &sb[48..176];

        for chunk in 0..4 {
            let ql = &qs[chunk * 32..chunk * 32 + 32];
            let (sc1, m1) = extract_scale_min(&scales, 2 * chunk);
            let (sc2, m2) = extract_scale_min(&scales, 2 * chunk + 1);
            let d1 = d * f32::from(sc1);
            let dm1 = dmin * f32::from(m1);
            let d2 = d * f32::from(sc2);
            let dm2 = dmin * f32::from(m2);
            let u1 = 1u8 << (2 * chunk);
            let u2 = 2u8 << (2 * chunk);

            let base = chunk * 64;
            for l in 0..32 {
                let lo = (ql[l] & 0x0F) + if qh[l] & u1 != 0 { 16 } else { 0 };
                let hi = (ql[l] >> 4) + if qh[l] & u2 != 0 { 16 } else { 0 };
                out[base + l] = d1 * f32::from(lo) - dm1;
                out[base + 32 + l] = d2 * f32::from(hi) - dm2;
            }
        }
    }

    Ok(result)
}

/// Dequantize `Q6_K` super-blocks
///
/// Layout: 128 bytes low nibbles `ql`, 64 bytes high 2-bit pairs `qh`,
/// 16 signed 8-bit sub-block scales, f16 `d`. `value = d * scale * (q - 32)`.
pub fn dequantize_q6_k(data: &[u8]) -> Result<Vec<f32>> {
    let num_super_blocks = block_count(QuantKind::Q6_K, data)?;
    let mut result = vec![0.0f32; num_super_blocks * QK_K];

    for (sb, out) in data
        .chunks_exact(QuantKind::Q6_K.block_bytes())
        .zip(result.chunks_exact_mut(QK_K))
    {
        let ql = &sb[0..128];
        let qh = &sb[128..192];
        let scales: Vec<f32> = sb[192..208]
            .iter()
            .map(|&b| f32::from(i8::from_le_bytes([b])))
            .collect();
        let d = read_f16(&sb[208..210]);

        for half in 0..2 {
            let sc = &scales[8 * half..];
            let ql = &ql[64 * half..];
            let qh = &qh[32 * half..];
            let base = 128 * half;

            for l in 0..32 {
                let is = l / 16;
                let q1 = i16::from((ql[l] & 0x0F) | ((qh[l] & 3) << 4)) - 32;
                let q2 = i16::from((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) - 32;
                let q3 = i16::from((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) - 32;
                let q4 = i16::from((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) - 32;

                out[base + l] = d * sc[is] * f32::from(q1);
                out[base + l + 32] = d * sc[is + 2] * f32::from(q2);
                out[base + l + 64] = d * sc[is + 4] * f32::from(q3);
                out[base + l + 96] = d * sc[is + 6] * f32::from(q4);
            }
        }
    }

    Ok(result)
}

/// Dequantize `Q2_K` super-blocks
///
/// Layout: 16 bytes of 4-bit scale/min pairs, 64 bytes of 2-bit values,
/// f16 `d`, f16 `dmin`. Each 128-element half walks 32 payload bytes four
/// times with an increasing shift.
pub fn dequantize_q2_k(data: &[u8]) -> Result<Vec<f32>> {
    let num_super_blocks = block_count(QuantKind::Q2_K, data)?;
    let mut result = vec![0.0f32; num_super_blocks * QK_K];

    for (sb, out) in data
        .chunks_exact(QuantKind::Q2_K.block_bytes())
        .zip(result.chunks_exact_mut(QK_K))
    {
        let scales = &sb[0..16];
        let qs = &sb[16..80];
        let d = read_f16(&sb[80..82]);
        let dmin = read_f16(&sb[82..84]);

        let mut y = 0;
        let mut is = 0;
        for half in 0..2 {
            let q = &qs[32 * half..32 * half + 32];
            for shift in [0u8, 2, 4, 6] {
                for group in 0..2 {
                    let sc = scales[is];
                    is += 1;
                    let dl = d * f32::from(sc & 0x0F);
                    let ml = dmin * f32::from(sc >> 4);
                    for l in 0..16 {
                        out[y] = dl * f32::from((q[l + 16 * group] >> shift) & 3) - ml;
                        y += 1;
                    }
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const F16_ONE: [u8; 2] = [0x00, 0x3C];
    const F16_HALF: [u8; 2] = [0x00, 0x38];
    const F16_TWO: [u8; 2] = [0x00, 0x40];

    #[test]
    fn test_q4_0_reference_block() {
        // d = 0.5, byte j = (j) | (15 - j) << 4
        let mut block = vec![0x00, 0x38];
        for j in 0..16u8 {
            block.push(j | ((15 - j) << 4));
        }
        let out = dequantize_q4_0(&block).unwrap();
        assert_eq!(out.len(), 32);
        for j in 0..16 {
            assert_eq!(out[j], 0.5 * (j as f32 - 8.0));
            assert_eq!(out[j + 16], 0.5 * ((15 - j) as f32 - 8.0));
        }
        assert_eq!(out[0], -4.0);
        assert_eq!(out[16], 3.5);
    }

    #[test]
    fn test_q4_0_rejects_partial_block() {
        let err = dequantize_q4_0(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, VargateError::DecodeError { kind: QuantKind::Q4_0, .. }));
    }

    #[test]
    fn test_q4_1_reference_block() {
        // d = 1.0, m = 0.5
        let mut block = Vec::new();
        block.extend_from_slice(&F16_ONE);
        block.extend_from_slice(&F16_HALF);
        block.extend(std::iter::repeat(0x3Au8).take(16)); // lo = 10, hi = 3
        let out = dequantize_q4_1(&block).unwrap();
        assert!(out[..16].iter().all(|&v| v == 10.5));
        assert!(out[16..].iter().all(|&v| v == 3.5));
    }

    #[test]
    fn test_q5_0_reference_block() {
        // d = 1.0, qh sets bit 0 and bit 16, nibbles all 0
        let mut block = Vec::new();
        block.extend_from_slice(&F16_ONE);
        block.extend_from_slice(&(1u32 | (1u32 << 16)).to_le_bytes());
        block.extend(std::iter::repeat(0u8).take(16));
        let out = dequantize_q5_0(&block).unwrap();
        assert_eq!(out[0], 0.0); // 16 - 16
        assert_eq!(out[1], -16.0);
        assert_eq!(out[16], 0.0);
        assert_eq!(out[17], -16.0);
    }

    #[test]
    fn test_q5_1_reference_block() {
        // d = 2.0, m = -1.0 (0xBC00), all fifth bits set, nibbles 0x21
        let mut block = Vec::new();
        block.extend_from_slice(&F16_TWO);
        block.extend_from_slice(&[0x00, 0xBC]);
        block.extend_from_slice(&u32::MAX.to_le_bytes());
        block.extend(std::iter::repeat(0x21u8).take(16));
        let out = dequantize_q5_1(&block).unwrap();
        assert!(out[..16].iter().all(|&v| v == 2.0 * 17.0 - 1.0));
        assert!(out[16..].iter().all(|&v| v == 2.0 * 18.0 - 1.0));
    }

    #[test]
    fn test_q8_0_reference_block() {
        // d = 0.25, q = -16..16
        let mut block = vec![0x00, 0x34];
        for i in 0..32i8 {
            block.push((i - 16).to_le_bytes()[0]);
        }
        let out = dequantize_q8_0(&block).unwrap();
        for (i, v) in out.iter().enumerate() {
            assert_eq!(*v, 0.25 * (i as f32 - 16.0));
        }
    }

    /// Pack per-sub-block 6-bit scales and mins the way the format does
    fn pack_k_scales(ls: [u8; 8], lm: [u8; 8]) -> [u8; 12] {
        let mut s = [0u8; 12];
        for j in 0..4 {
            s[j] = ls[j] & 63;
            s[j + 4] = lm[j] & 63;
        }
        for j in 4..8 {
            s[j + 4] = (ls[j] & 0x0F) | ((lm[j] & 0x0F) << 4);
            s[j - 4] |= (ls[j] >> 4) << 6;
            s[j] |= (lm[j] >> 4) << 6;
        }
        s
    }

    #[test]
    fn test_k_scale_literal_packing() {
        let ls = [1, 2, 3, 4, 20, 6, 7, 8];
        let lm = [0, 1, 2, 3, 4, 5, 6, 33];
        let packed = pack_k_scales(ls, lm);
        assert_eq!(
            packed,
            [0x41, 0x02, 0x03, 0x04, 0x00, 0x01, 0x02, 0x83, 0x44, 0x56, 0x67, 0x18]
        );
        for j in 0..8 {
            assert_eq!(extract_scale_min(&packed, j), (ls[j], lm[j]), "sub-block {j}");
        }
    }

    #[test]
    fn test_q4_k_reference_super_block() {
        let ls = [1u8, 2, 3, 4, 20, 6, 7, 8];
        let lm = [0u8, 1, 2, 3, 4, 5, 6, 33];
        let mut sb = Vec::new();
        sb.extend_from_slice(&F16_ONE); // d = 1.0
        sb.extend_from_slice(&F16_HALF); // dmin = 0.5
        sb.extend_from_slice(&pack_k_scales(ls, lm));
        for _chunk in 0..4 {
            for l in 0..32u8 {
                sb.push((l & 0x0F) | ((15 - (l & 0x0F)) << 4));
            }
        }
        assert_eq!(sb.len(), 144);

        let out = dequantize_q4_k(&sb).unwrap();
        assert_eq!(out.len(), 256);
        for chunk in 0..4 {
            for l in 0..32 {
                let lo = f32::from((l & 0x0F) as u8);
                let hi = 15.0 - lo;
                let expect_lo = f32::from(ls[2 * chunk]) * lo - 0.5 * f32::from(lm[2 * chunk]);
                let expect_hi =
                    f32::from(ls[2 * chunk + 1]) * hi - 0.5 * f32::from(lm[2 * chunk + 1]);
                assert_eq!(out[chunk * 64 + l], expect_lo, "chunk {chunk} lo {l}");
                assert_eq!(out[chunk * 64 + 32 + l], expect_hi, "chunk {chunk} hi {l}");
            }
        }
        // Spot values: sub-block 4 has scale 20, sub-block 7 has min 33
        assert_eq!(out[128 + 1], 20.0 * 1.0 - 2.0);
        assert_eq!(out[192 + 32], 8.0 * 15.0 - 16.5);
    }

    #[test]
    fn test_q5_k_fifth_bits() {
        let ls = [1u8; 8];
        let lm = [0u8; 8];
        let mut sb = Vec::new();
        sb.extend_from_slice(&F16_ONE);
        sb.extend_from_slice(&F16_ONE);
        sb.extend_from_slice(&pack_k_scales(ls, lm));
        // qh[l]: bit 0 set (chunk 0 low) and bit 7 set (chunk 3 high)
        sb.extend(std::iter::repeat(0x81u8).take(32));
        sb.extend(std::iter::repeat(0x00u8).take(128));
        assert_eq!(sb.len(), 176);

        let out = dequantize_q5_k(&sb).unwrap();
        assert!(out[0..32].iter().all(|&v| v == 16.0));
        assert!(out[32..64].iter().all(|&v| v == 0.0));
        assert!(out[64..224].iter().all(|&v| v == 0.0));
        assert!(out[224..256].iter().all(|&v| v == 16.0));
    }

    #[test]
    fn test_q6_k_reference_super_block() {
        let mut sb = vec![0u8; 210];
        // First half, l = 0: q1 low nibble 5, q3 low nibble 1; qh bits: q1 hi=1, q4 hi=3
        sb[0] = 0x15;
        sb[128] = 0b1100_0001;
        // Scales: sub-block k has scale k + 1, last one negative
        for k in 0..16 {
            sb[192 + k] = (k as i8 + 1).to_le_bytes()[0];
        }
        sb[207] = (-2i8).to_le_bytes()[0];
        sb[208..210].copy_from_slice(&F16_HALF);

        let out = dequantize_q6_k(&sb).unwrap();
        // q1 = 5 | 1 << 4 = 21 -> 21 - 32 = -11, scale index 0 -> 1
        assert_eq!(out[0], 0.5 * 1.0 * -11.0);
        // q2 = 0 -> -32, scale index 2 -> 3
        assert_eq!(out[32], 0.5 * 3.0 * -32.0);
        // q3 = 1 -> -31, scale index 4 -> 5
        assert_eq!(out[64], 0.5 * 5.0 * -31.0);
        // q4 = 0 | 3 << 4 = 48 -> 16, scale index 6 -> 7
        assert_eq!(out[96], 0.5 * 7.0 * 16.0);
        // Second half, last element uses scale index 15 -> -2
        assert_eq!(out[255], 0.5 * -2.0 * -32.0);
    }

    #[test]
    fn test_q2_k_reference_super_block() {
        let mut sb = vec![0u8; 84];
        // scale/min pairs: sc = 2, m = 1 for all sub-blocks
        for s in &mut sb[0..16] {
            *s = 0x12;
        }
        // payload byte 0 = 0b11_10_01_00 -> values 0,1,2,3 across the four shifts
        sb[16] = 0b1110_0100;
        sb[80..82].copy_from_slice(&F16_ONE);
        sb[82..84].copy_from_slice(&F16_HALF);

        let out = dequantize_q2_k(&sb).unwrap();
        assert_eq!(out.len(), 256);
        // element 0 is shift 0, element 32 shift 2, 64 shift 4, 96 shift 6
        assert_eq!(out[0], 2.0 * 0.0 - 0.5);
        assert_eq!(out[32], 2.0 * 1.0 - 0.5);
        assert_eq!(out[64], 2.0 * 2.0 - 0.5);
        assert_eq!(out[96], 2.0 * 3.0 - 0.5);
        assert_eq!(out[1], -0.5);
    }

    #[test]
    fn test_f32_and_f16_plain() {
        let data: Vec<u8> = [1.5f32, -2.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(dequantize_f32(&data).unwrap(), vec![1.5, -2.25]);
        assert!(dequantize_f32(&data[..7]).is_err());

        let out = dequantize_f16(&[0x00, 0x3C, 0x00, 0xC0]).unwrap();
        assert_eq!(out, vec![1.0, -2.0]);
        assert!(dequantize_f16(&[0x00]).is_err());
    }

    #[test]
    fn test_empty_inputs_decode_to_nothing() {
        assert!(dequantize_q4_k(&[]).unwrap().is_empty());
        assert!(dequantize_q6_k(&[]).unwrap().is_empty());
        assert!(dequantize_q8_0(&[]).unwrap().is_empty());
    }
}
