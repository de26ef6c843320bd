//! Pure mathematical operations for the forward pass
//!
//! - `rms_norm_into`: RMSNorm normalization
//! - `silu`: SiLU/Swish activation for the gated FFN
//! - `softmax`: numerically stable softmax
//! - `apply_rope`: rotary position embedding (adjacent-pair style)
//! - `argmax`: greedy pick
//! - [`DenseMatrix`] and the [`MatVec`] seam shared with [`crate::sparse::CsrMatrix`]

use rayon::prelude::*;

use crate::error::{Result, VargateError};

/// Row count × column count above which matvec fans rows out over rayon
const PARALLEL_MATVEC_THRESHOLD: usize = 16 * 1024;

// =============================================================================
// Matrix-vector seam
// =============================================================================

/// Matrix-vector product `out = W · x` for a `[rows, cols]` weight
///
/// Implementations sum each row in increasing column order, so a dense matrix
/// and a CSR matrix holding the same nonzero entries produce identical output.
pub trait MatVec: Send + Sync {
    /// Output dimension
    fn rows(&self) -> usize;

    /// Input dimension
    fn cols(&self) -> usize;

    /// Compute `W · x` into `out`
    ///
    /// Callers guarantee `x.len() == cols()` and `out.len() == rows()`.
    fn matvec_into(&self, x: &[f32], out: &mut [f32]);

    /// Checked variant of [`MatVec::matvec_into`] returning a new buffer
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] if `x.len() != cols()`.
    fn matvec(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.cols() {
            return Err(VargateError::config(format!(
                "matvec input has {} elements, matrix has {} columns",
                x.len(),
                self.cols()
            )));
        }
        let mut out = vec![0.0; self.rows()];
        self.matvec_into(x, &mut out);
        Ok(out)
    }
}

/// Row-major dense f32 matrix
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl DenseMatrix {
    /// Wrap a row-major buffer
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(VargateError::config(format!(
                "matrix [{rows}, {cols}] needs {} values, got {}",
                rows.saturating_mul(cols),
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// All-zero matrix
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Row-major values
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One row
    #[must_use]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// One row, mutably
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Consume into the row-major buffer
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

impl MatVec for DenseMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn matvec_into(&self, x: &[f32], out: &mut [f32]) {
        debug_assert_eq!(x.len(), self.cols);
        debug_assert_eq!(out.len(), self.rows);
        if self.rows * self.cols >= PARALLEL_MATVEC_THRESHOLD {
            out.par_iter_mut()
                .zip(self.data.par_chunks_exact(self.cols))
                .for_each(|(o, row)| *o = dot(row, x));
        } else {
            for (o, row) in out.iter_mut().zip(self.data.chunks_exact(self.cols)) {
                *o = dot(row, x);
            }
        }
    }
}

/// Sequential dot product, summed in index order
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0f32, |acc, (x, y)| acc + x * y)
}

// =============================================================================
// Normalization and activations
// =============================================================================

/// RMSNorm into a pre-allocated buffer
///
/// Formula: `output = x / sqrt(mean(x^2) + eps) * weight`
pub fn rms_norm_into(input: &[f32], weight: &[f32], eps: f32, output: &mut [f32]) {
    let hidden_dim = weight.len();
    let x = &input[..hidden_dim];
    let sum_sq: f32 = x.iter().map(|v| v * v).sum();
    let inv_rms = 1.0 / (sum_sq / hidden_dim as f32 + eps).sqrt();
    for ((o, &xi), &w) in output.iter_mut().zip(x).zip(weight) {
        *o = xi * inv_rms * w;
    }
}

/// SiLU (Sigmoid Linear Unit) activation, in place
///
/// `SiLU(x) = x * sigmoid(x) = x / (1 + exp(-x))`
#[inline]
pub fn silu(input: &mut [f32]) {
    for x in input.iter_mut() {
        *x /= 1.0 + (-*x).exp();
    }
}

/// Numerically stable softmax, in place
pub fn softmax(logits: &mut [f32]) {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for x in logits.iter_mut() {
        *x = (*x - max_val).exp();
        sum += *x;
    }
    let inv_sum = 1.0 / sum;
    for x in logits.iter_mut() {
        *x *= inv_sum;
    }
}

/// Index of the maximum value (first one on ties)
#[inline]
pub fn argmax(logits: &[f32]) -> u32 {
    let mut max_idx = 0u32;
    let mut max_val = f32::NEG_INFINITY;
    for (i, &val) in logits.iter().enumerate() {
        if val > max_val {
            max_val = val;
            max_idx = i as u32;
        }
    }
    max_idx
}

/// Apply rotary position embedding in place
///
/// Rotates adjacent pairs `(x[2i], x[2i+1])` of each head by
/// `position * theta^(-2i / head_dim)`. `x` holds `x.len() / head_dim` heads.
pub fn apply_rope(x: &mut [f32], position: usize, head_dim: usize, theta: f32) {
    let half_dim = head_dim / 2;
    let pos = position as f32;
    let freqs: Vec<(f32, f32)> = (0..half_dim)
        .map(|i| {
            let freq = 1.0 / theta.powf(2.0 * i as f32 / head_dim as f32);
            (pos * freq).sin_cos()
        })
        .collect();

    for head in x.chunks_exact_mut(head_dim) {
        for (i, &(sin_v, cos_v)) in freqs.iter().enumerate() {
            let x0 = head[2 * i];
            let x1 = head[2 * i + 1];
            head[2 * i] = x0 * cos_v - x1 * sin_v;
            head[2 * i + 1] = x0 * sin_v + x1 * cos_v;
        }
    }
}

/// First index holding a NaN or infinity
#[inline]
pub fn first_non_finite(values: &[f32]) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}
