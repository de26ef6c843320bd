//! Quick entropy: a cheap confidence proxy over a logits subsample
//!
//! Reads `S` logits at a fixed stride, softmaxes only those, and returns the
//! Shannon entropy (nats) of that reduced distribution. Logits outside the
//! sample are ignored, so the value is biased; it only has to rank "peaked"
//! against "flat" cheaply. Work is `O(S)` regardless of vocabulary size.

/// Default number of sampled logits
pub const DEFAULT_SAMPLE_SIZE: usize = 64;

/// Indices read for a vocabulary of `len` logits and a sample of `sample_size`
///
/// `min(sample_size, len)` indices starting at 0 with stride
/// `len / min(sample_size, len)`. Identical inputs always yield identical
/// indices.
pub fn sample_indices(len: usize, sample_size: usize) -> impl Iterator<Item = usize> {
    let count = sample_size.min(len);
    let stride = if count == 0 { 0 } else { len / count };
    (0..count).map(move |i| i * stride)
}

/// Shannon entropy (nats) of the softmax over a strided logits sample
///
/// Returns 0 for an empty vector or a zero sample size.
#[must_use]
pub fn quick_entropy(logits: &[f32], sample_size: usize) -> f32 {
    let mut max = f32::NEG_INFINITY;
    let mut count = 0usize;
    for i in sample_indices(logits.len(), sample_size) {
        max = max.max(logits[i]);
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }

    // H = log(Z) - sum(p * (x - max)), with Z = sum(exp(x - max))
    let mut z = 0.0f32;
    let mut weighted = 0.0f32;
    for i in sample_indices(logits.len(), sample_size) {
        let shifted = logits[i] - max;
        let e = shifted.exp();
        z += e;
        weighted += e * shifted;
    }
    (z.ln() - weighted / z).max(0.0)
}
