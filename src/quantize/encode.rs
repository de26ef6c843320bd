//! Reference quantizers
//!
//! Produce byte spans the decoders in [`super::dequant`] read back. Used by
//! the container builder to write quantized tensors and by tests to build
//! blocks from known float values. These run offline, never on the hot path.

use half::f16;

use super::types::{QuantKind, BLOCK_SIZE, K_SCALE_SIZE, QK_K};
use crate::error::{Result, VargateError};

fn check_len(kind: QuantKind, values: &[f32]) -> Result<()> {
    if values.len() % kind.block_elems() != 0 {
        return Err(VargateError::config(format!(
            "{} encoding needs a multiple of {} values, got {}",
            kind,
            kind.block_elems(),
            values.len()
        )));
    }
    Ok(())
}

/// Encode `values` in the given kind
///
/// # Errors
///
/// Returns [`VargateError::InvalidConfiguration`] if the length is not a whole
/// number of blocks or the kind has no encoder (`Q4_1`, `Q5_*`, `Q2_K`).
pub fn quantize(kind: QuantKind, values: &[f32]) -> Result<Vec<u8>> {
    match kind {
        QuantKind::F32 => Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        QuantKind::F16 => Ok(quantize_f16(values)),
        QuantKind::Q4_0 => quantize_q4_0(values),
        QuantKind::Q8_0 => quantize_q8_0(values),
        QuantKind::Q4_K => quantize_q4_k(values),
        QuantKind::Q6_K => quantize_q6_k(values),
        other => Err(VargateError::config(format!("no encoder for {other}"))),
    }
}

/// Encode as little-endian half precision (round to nearest even)
pub fn quantize_f16(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| f16::from_f32(v).to_le_bytes())
        .collect()
}

/// Encode `Q4_0` blocks
///
/// The scale is chosen so the element with the largest magnitude maps to -8.
pub fn quantize_q4_0(values: &[f32]) -> Result<Vec<u8>> {
    check_len(QuantKind::Q4_0, values)?;
    let mut out = Vec::with_capacity(values.len() / BLOCK_SIZE * QuantKind::Q4_0.block_bytes());

    for block in values.chunks_exact(BLOCK_SIZE) {
        let max = block
            .iter()
            .copied()
            .fold(0.0f32, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let d = max / -8.0;
        let id = if d == 0.0 { 0.0 } else { 1.0 / d };
        out.extend_from_slice(&f16::from_f32(d).to_le_bytes());

        for j in 0..16 {
            let x0 = (block[j] * id + 8.5).clamp(0.0, 15.0) as u8;
            let x1 = (block[j + 16] * id + 8.5).clamp(0.0, 15.0) as u8;
            out.push(x0 | (x1 << 4));
        }
    }

    Ok(out)
}

/// Encode `Q8_0` blocks with a symmetric scale of `max|x| / 127`
pub fn quantize_q8_0(values: &[f32]) -> Result<Vec<u8>> {
    check_len(QuantKind::Q8_0, values)?;
    let mut out = Vec::with_capacity(values.len() / BLOCK_SIZE * QuantKind::Q8_0.block_bytes());

    for block in values.chunks_exact(BLOCK_SIZE) {
        let amax = block.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        let d = amax / 127.0;
        let id = if d == 0.0 { 0.0 } else { 1.0 / d };
        out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
        out.extend(
            block
                .iter()
                .map(|&x| ((x * id).round().clamp(-128.0, 127.0) as i8).to_le_bytes()[0]),
        );
    }

    Ok(out)
}

/// Encode `Q4_K` super-blocks
///
/// Each 32-element sub-block gets an affine range `[mn, mx]` with `mn <= 0`;
/// its scale and min are quantized to 6 bits against the super-block maxima.
pub fn quantize_q4_k(values: &[f32]) -> Result<Vec<u8>> {
    check_len(QuantKind::Q4_K, values)?;
    let mut out = Vec::with_capacity(values.len() / QK_K * QuantKind::Q4_K.block_bytes());

    for sb in values.chunks_exact(QK_K) {
        let mut sub_scales = [0.0f32; 8];
        let mut sub_mins = [0.0f32; 8];
        for (j, sub) in sb.chunks_exact(32).enumerate() {
            let mn = sub.iter().copied().fold(0.0f32, f32::min);
            let mx = sub.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            sub_scales[j] = (mx - mn) / 15.0;
            sub_mins[j] = -mn;
        }

        let max_scale = sub_scales.iter().copied().fold(0.0f32, f32::max);
        let max_min = sub_mins.iter().copied().fold(0.0f32, f32::max);
        let d = f16::from_f32(max_scale / 63.0);
        let dmin = f16::from_f32(max_min / 63.0);
        let (df, dminf) = (d.to_f32(), dmin.to_f32());

        let mut ls = [0u8; 8];
        let mut lm = [0u8; 8];
        for j in 0..8 {
            ls[j] = if df > 0.0 { (sub_scales[j] / df).round().clamp(0.0, 63.0) as u8 } else { 0 };
            lm[j] = if dminf > 0.0 { (sub_mins[j] / dminf).round().clamp(0.0, 63.0) as u8 } else { 0 };
        }

        let mut scales = [0u8; K_SCALE_SIZE];
        for j in 0..4 {
            scales[j] = ls[j] & 63;
            scales[j + 4] = lm[j] & 63;
        }
        for j in 4..8 {
            scales[j + 4] = (ls[j] & 0x0F) | ((lm[j] & 0x0F) << 4);
            scales[j - 4] |= (ls[j] >> 4) << 6;
            scales[j] |= (lm[j] >> 4) << 6;
        }

        let mut q = [0u8; QK_K];
        for (j, sub) in sb.chunks_exact(32).enumerate() {
            let scale = df * f32::from(ls[j]);
            let offset = dminf * f32::from(lm[j]);
            for (l, &x) in sub.iter().enumerate() {
                q[j * 32 + l] = if scale > 0.0 {
                    ((x + offset) / scale).round().clamp(0.0, 15.0) as u8
                } else {
                    0
                };
            }
        }

        out.extend_from_slice(&d.to_le_bytes());
        out.extend_from_slice(&dmin.to_le_bytes());
        out.extend_from_slice(&scales);
        for chunk in 0..4 {
            for l in 0..32 {
                out.push(q[chunk * 64 + l] | (q[chunk * 64 + 32 + l] << 4));
            }
        }
    }

    Ok(out)
}

/// Encode `Q6_K` super-blocks
///
/// Sixteen 16-element sub-blocks, each with a signed 8-bit scale relative to
/// the super-block `d`; values are stored as 6-bit `q + 32`.
pub fn quantize_q6_k(values: &[f32]) -> Result<Vec<u8>> {
    check_len(QuantKind::Q6_K, values)?;
    let mut out = Vec::with_capacity(values.len() / QK_K * QuantKind::Q6_K.block_bytes());

    for sb in values.chunks_exact(QK_K) {
        let mut sub_scales = [0.0f32; 16];
        for (k, sub) in sb.chunks_exact(16).enumerate() {
            sub_scales[k] = sub.iter().fold(0.0f32, |acc, v| acc.max(v.abs())) / 31.0;
        }
        let max_scale = sub_scales.iter().copied().fold(0.0f32, f32::max);
        let d = f16::from_f32(max_scale / 127.0);
        let df = d.to_f32();

        let mut sc = [0i8; 16];
        for k in 0..16 {
            sc[k] = if df > 0.0 { (sub_scales[k] / df).round().clamp(0.0, 127.0) as i8 } else { 0 };
        }

        let mut q = [0u8; QK_K];
        for (e, &x) in sb.iter().enumerate() {
            let scale = df * f32::from(sc[e / 16]);
            let qi = if scale > 0.0 { (x / scale).round().clamp(-32.0, 31.0) as i8 } else { 0 };
            q[e] = (i16::from(qi) + 32) as u8;
        }

        let mut ql = [0u8; 128];
        let mut qh = [0u8; 64];
        for half in 0..2 {
            let base = 128 * half;
            for l in 0..32 {
                let q1 = q[base + l];
                let q2 = q[base + l + 32];
                let q3 = q[base + l + 64];
                let q4 = q[base + l + 96];
                ql[64 * half + l] = (q1 & 0x0F) | ((q3 & 0x0F) << 4);
                ql[64 * half + l + 32] = (q2 & 0x0F) | ((q4 & 0x0F) << 4);
                qh[32 * half + l] = (q1 >> 4) | ((q2 >> 4) << 2) | ((q3 >> 4) << 4) | ((q4 >> 4) << 6);
            }
        }

        out.extend_from_slice(&ql);
        out.extend_from_slice(&qh);
        out.extend(sc.iter().map(|s| s.to_le_bytes()[0]));
        out.extend_from_slice(&d.to_le_bytes());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::dequantize;

    #[test]
    fn test_q4_0_grid_values_round_trip_exactly() {
        // Values on the d = 0.5 grid, including -4.0 which pins the scale
        let values: Vec<f32> = (0..32).map(|i| 0.5 * ((i % 16) as f32 - 8.0)).collect();
        let bytes = quantize_q4_0(&values).unwrap();
        assert_eq!(bytes.len(), 18);
        let back = dequantize(QuantKind::Q4_0, &bytes, 32).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_q8_0_grid_values_round_trip_exactly() {
        let values: Vec<f32> = (0..32).map(|i| 0.25 * (i * 8 - 127) as f32).collect();
        let bytes = quantize_q8_0(&values).unwrap();
        let back = dequantize(QuantKind::Q8_0, &bytes, 32).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_f16_round_trip_representable_values() {
        let values = [0.0f32, -0.5, 1.0, 3.140625, 65504.0, -6.103_515_6e-5];
        let bytes = quantize(QuantKind::F16, &values).unwrap();
        let back = dequantize(QuantKind::F16, &bytes, values.len()).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_f32_round_trip() {
        let values = [1.0e-30f32, -7.5, f32::MAX];
        let bytes = quantize(QuantKind::F32, &values).unwrap();
        assert_eq!(dequantize(QuantKind::F32, &bytes, 3).unwrap(), values);
    }

    #[test]
    fn test_q4_k_round_trip_within_tolerance() {
        let values: Vec<f32> = (0..512).map(|i| (i as f32 * 0.9).sin()).collect();
        let bytes = quantize_q4_k(&values).unwrap();
        assert_eq!(bytes.len(), 288);
        let back = dequantize(QuantKind::Q4_K, &bytes, 512).unwrap();
        for (i, (a, b)) in values.iter().zip(&back).enumerate() {
            assert!((a - b).abs() < 0.1, "element {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_q6_k_round_trip_within_tolerance() {
        let values: Vec<f32> = (0..256).map(|i| 3.0 * (i as f32 * 0.41).cos()).collect();
        let bytes = quantize_q6_k(&values).unwrap();
        assert_eq!(bytes.len(), 210);
        let back = dequantize(QuantKind::Q6_K, &bytes, 256).unwrap();
        for (i, (a, b)) in values.iter().zip(&back).enumerate() {
            assert!((a - b).abs() < 0.1, "element {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_all_zero_blocks_stay_zero() {
        let zeros = vec![0.0f32; 256];
        for kind in [QuantKind::Q4_0, QuantKind::Q8_0, QuantKind::Q4_K, QuantKind::Q6_K] {
            let bytes = quantize(kind, &zeros).unwrap();
            let back = dequantize(kind, &bytes, 256).unwrap();
            assert!(back.iter().all(|&v| v == 0.0), "{kind}");
        }
    }

    #[test]
    fn test_unsupported_encoder() {
        assert!(quantize(QuantKind::Q5_1, &[0.0; 32]).is_err());
        assert!(quantize_q4_k(&[0.0; 100]).is_err());
    }
}
