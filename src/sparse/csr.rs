//! Compressed sparse row storage

use rayon::prelude::*;

use crate::error::{Result, VargateError};
use crate::ops::{DenseMatrix, MatVec};

/// Row count above which CSR matvec fans rows out over rayon
const PARALLEL_ROWS_THRESHOLD: usize = 256;

/// CSR matrix: nonzero values, their column indices, and row start offsets
///
/// Row `r` owns entries `row_offsets[r]..row_offsets[r + 1]`, with column
/// indices strictly increasing inside each row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
    col_indices: Vec<u32>,
    row_offsets: Vec<usize>,
}

impl CsrMatrix {
    /// Compact a dense matrix, keeping entries with `value != 0`
    #[must_use]
    pub fn compact(dense: &DenseMatrix) -> Self {
        let (rows, cols) = (dense.rows(), dense.cols());
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(rows + 1);
        row_offsets.push(0);

        for r in 0..rows {
            for (c, &v) in dense.row(r).iter().enumerate() {
                if v != 0.0 {
                    values.push(v);
                    col_indices.push(c as u32);
                }
            }
            row_offsets.push(values.len());
        }

        Self {
            rows,
            cols,
            values,
            col_indices,
            row_offsets,
        }
    }

    /// Build from raw parts, validating the CSR invariants
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] if offsets are not
    /// monotonic from 0 to `values.len()`, array lengths disagree, or a row's
    /// column indices are out of range or not strictly increasing.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        values: Vec<f32>,
        col_indices: Vec<u32>,
        row_offsets: Vec<usize>,
    ) -> Result<Self> {
        if row_offsets.len() != rows + 1
            || values.len() != col_indices.len()
            || row_offsets.first() != Some(&0)
            || row_offsets.last() != Some(&values.len())
            || row_offsets.windows(2).any(|w| w[0] > w[1])
        {
            return Err(VargateError::config("inconsistent CSR offsets or array lengths"));
        }
        for r in 0..rows {
            let row = &col_indices[row_offsets[r]..row_offsets[r + 1]];
            if row.iter().any(|&c| c as usize >= cols) || row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(VargateError::config(format!(
                    "row {r} has out-of-range or unordered column indices"
                )));
            }
        }
        Ok(Self {
            rows,
            cols,
            values,
            col_indices,
            row_offsets,
        })
    }

    /// Expand back to dense, zero-filling omitted entries
    #[must_use]
    pub fn to_dense(&self) -> DenseMatrix {
        let mut dense = DenseMatrix::zeros(self.rows, self.cols);
        for r in 0..self.rows {
            let (cols, vals) = self.row(r);
            let out = dense.row_mut(r);
            for (&c, &v) in cols.iter().zip(vals) {
                out[c as usize] = v;
            }
        }
        dense
    }

    /// Column indices and values stored for row `r`
    #[must_use]
    pub fn row(&self, r: usize) -> (&[u32], &[f32]) {
        let range = self.row_offsets[r]..self.row_offsets[r + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }

    /// Number of stored entries
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Fraction of the dense extent that is not stored
    #[must_use]
    pub fn sparsity(&self) -> f32 {
        let total = self.rows * self.cols;
        if total == 0 {
            return 0.0;
        }
        1.0 - self.nnz() as f32 / total as f32
    }

    /// Stored values
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Column index of each stored value
    #[must_use]
    pub fn col_indices(&self) -> &[u32] {
        &self.col_indices
    }

    /// Row start offsets (`rows + 1` entries)
    #[must_use]
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    fn row_dot(&self, r: usize, x: &[f32]) -> f32 {
        let (cols, vals) = self.row(r);
        cols.iter()
            .zip(vals)
            .fold(0.0f32, |acc, (&c, &v)| acc + v * x[c as usize])
    }
}

impl MatVec for CsrMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn matvec_into(&self, x: &[f32], out: &mut [f32]) {
        debug_assert_eq!(x.len(), self.cols);
        debug_assert_eq!(out.len(), self.rows);
        if self.rows >= PARALLEL_ROWS_THRESHOLD {
            out.par_iter_mut()
                .enumerate()
                .for_each(|(r, o)| *o = self.row_dot(r, x));
        } else {
            for (r, o) in out.iter_mut().enumerate() {
                *o = self.row_dot(r, x);
            }
        }
    }
}
