//! Magnitude pruning

use tracing::warn;

use crate::error::{Result, VargateError};
use crate::ops::{DenseMatrix, MatVec};

/// Zero the `floor(ratio * len)` lowest-magnitude elements of `values`
///
/// Ties in magnitude are broken by index, lower index pruned first, so the
/// result is a pure function of the input. Returns the number of elements
/// selected for pruning.
///
/// # Errors
///
/// Returns [`VargateError::InvalidConfiguration`] if `ratio` is outside `[0, 1)`.
pub fn prune(values: &mut [f32], ratio: f32) -> Result<usize> {
    if !(0.0..1.0).contains(&ratio) {
        return Err(VargateError::config(format!(
            "sparsity ratio {ratio} must be in [0, 1)"
        )));
    }

    let count = (f64::from(ratio) * values.len() as f64).floor() as usize;
    // CSR omits zeros and restores them as +0.0, so -0.0 must not survive
    for v in values.iter_mut().filter(|v| **v == 0.0) {
        *v = 0.0;
    }
    if count == 0 {
        if ratio > 0.0 {
            warn!(ratio, len = values.len(), "sparsity ratio prunes no elements");
        }
        return Ok(0);
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        values[a]
            .abs()
            .total_cmp(&values[b].abs())
            .then(a.cmp(&b))
    });
    for &idx in &order[..count] {
        values[idx] = 0.0;
    }
    Ok(count)
}

/// Prune a copy of `matrix`
///
/// # Errors
///
/// Returns [`VargateError::InvalidConfiguration`] if `ratio` is outside `[0, 1)`.
pub fn prune_matrix(matrix: &DenseMatrix, ratio: f32) -> Result<DenseMatrix> {
    let mut data = matrix.data().to_vec();
    prune(&mut data, ratio)?;
    DenseMatrix::new(matrix.rows(), matrix.cols(), data)
}
