//! Single-query causal attention over cached rows plus the current row

use crate::kv_cache::KvView;
use crate::ops::{dot, softmax};

/// Head geometry for grouped-query attention
#[derive(Debug, Clone, Copy)]
pub(super) struct HeadLayout {
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

/// Attend `q` over `context` rows `0..n` followed by the staged `key`/`value`
///
/// Query head `h` reads KV head `h / (num_heads / num_kv_heads)`. Writes
/// `num_heads * head_dim` values into `out`.
pub(super) fn attend(
    q: &[f32],
    context: Option<&KvView<'_>>,
    key: &[f32],
    value: &[f32],
    layout: HeadLayout,
    scores: &mut Vec<f32>,
    out: &mut [f32],
) {
    let HeadLayout {
        num_heads,
        num_kv_heads,
        head_dim,
    } = layout;
    let group = num_heads / num_kv_heads;
    let scale = 1.0 / (head_dim as f32).sqrt();
    let cached = context.map_or(0, |c| c.len);

    for h in 0..num_heads {
        let kv = (h / group) * head_dim..(h / group + 1) * head_dim;
        let q_h = &q[h * head_dim..(h + 1) * head_dim];

        scores.clear();
        if let Some(ctx) = context {
            for pos in 0..ctx.len {
                scores.push(dot(q_h, &ctx.key(pos)[kv.clone()]) * scale);
            }
        }
        scores.push(dot(q_h, &key[kv.clone()]) * scale);
        softmax(scores);

        let out_h = &mut out[h * head_dim..(h + 1) * head_dim];
        out_h.fill(0.0);
        if let Some(ctx) = context {
            for pos in 0..ctx.len {
                accumulate(out_h, scores[pos], &ctx.value(pos)[kv.clone()]);
            }
        }
        accumulate(out_h, scores[cached], &value[kv]);
    }
}

fn accumulate(out: &mut [f32], weight: f32, row: &[f32]) {
    for (o, x) in out.iter_mut().zip(row) {
        *o += weight * x;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: HeadLayout = HeadLayout {
        num_heads: 2,
        num_kv_heads: 1,
        head_dim: 2,
    };

    #[test]
    fn test_first_position_copies_value() {
        let mut scores = Vec::new();
        let mut out = [0.0; 4];
        attend(&[1.0, 0.0, 0.0, 1.0], None, &[0.3, 0.4], &[5.0, 7.0], LAYOUT, &mut scores, &mut out);
        // One row: softmax weight 1 for both heads sharing the KV head
        assert_eq!(out, [5.0, 7.0, 5.0, 7.0]);
    }

    #[test]
    fn test_weights_follow_scores() {
        let keys = [10.0, 0.0];
        let values = [1.0, 1.0];
        let view = KvView {
            keys: &keys,
            values: &values,
            len: 1,
        };
        let mut scores = Vec::new();
        let mut out = [0.0; 4];
        // Head 0 matches the cached key strongly, head 1 is indifferent
        attend(
            &[10.0, 0.0, 0.0, 0.0],
            Some(&view),
            &[0.0, 0.0],
            &[3.0, 3.0],
            LAYOUT,
            &mut scores,
            &mut out,
        );
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[2] - 2.0).abs() < 1e-6);
    }
}
