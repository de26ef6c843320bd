//! Named tensors with exactly one live representation
//!
//! A tensor starts as the compressed bytes read from a container, is decoded
//! to dense f32 once at load time, and may be compacted to CSR for the sparse
//! path. Every conversion is an explicit call that consumes or copies; no
//! hot-path code converts implicitly.

use crate::error::{Result, VargateError};
use crate::ops::DenseMatrix;
use crate::quantize::{dequantize, QuantKind};
use crate::sparse::{prune_matrix, CsrMatrix};

/// Storage behind a tensor
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// Raw block-quantized bytes, as stored in the container
    Quantized(Vec<u8>),
    /// Decoded row-major f32 values
    Dense(Vec<f32>),
    /// Pruned and compacted matrix
    Csr(CsrMatrix),
}

impl TensorData {
    /// Short name of the representation
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Quantized(_) => "quantized",
            Self::Dense(_) => "dense",
            Self::Csr(_) => "csr",
        }
    }
}

/// Named tensor
///
/// # Examples
///
/// ```
/// use vargate::quantize::QuantKind;
/// use vargate::tensor::Tensor;
///
/// let bytes: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
/// let t = Tensor::quantized("norm", vec![2], QuantKind::F32, bytes).dequantize().unwrap();
/// assert_eq!(t.as_dense(), Some(&[1.0, 2.0][..]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: String,
    dims: Vec<usize>,
    kind: QuantKind,
    data: TensorData,
}

impl Tensor {
    /// Wrap compressed bytes read from a container
    #[must_use]
    pub fn quantized(name: impl Into<String>, dims: Vec<usize>, kind: QuantKind, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            dims,
            kind,
            data: TensorData::Quantized(bytes),
        }
    }

    /// Wrap already-dense values
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] if `values.len()` does
    /// not match the product of `dims`.
    pub fn dense(name: impl Into<String>, dims: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let expected: usize = dims.iter().product();
        if values.len() != expected {
            return Err(VargateError::config(format!(
                "tensor '{name}' shape {dims:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            name,
            dims,
            kind: QuantKind::F32,
            data: TensorData::Dense(values),
        })
    }

    /// Tensor name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical shape
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Kind the tensor was stored as
    #[must_use]
    pub fn kind(&self) -> QuantKind {
        self.kind
    }

    /// Number of logical elements
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Live representation
    #[must_use]
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Dense values, if that is the live representation
    #[must_use]
    pub fn as_dense(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Dense(v) => Some(v),
            _ => None,
        }
    }

    /// Decode compressed bytes into dense f32 (compressed → dense)
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::DecodeError`] if the bytes disagree with the
    /// kind's block arithmetic, or [`VargateError::InvalidConfiguration`] if
    /// the tensor is not in its compressed form.
    pub fn dequantize(self) -> Result<Self> {
        let n_elements = self.element_count();
        match self.data {
            TensorData::Quantized(bytes) => {
                let values = dequantize(self.kind, &bytes, n_elements)?;
                Ok(Self {
                    data: TensorData::Dense(values),
                    ..self
                })
            },
            other => Err(VargateError::config(format!(
                "tensor '{}' is {}, only quantized tensors decode",
                self.name,
                other.label()
            ))),
        }
    }

    /// View a dense 2-D tensor as a matrix
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] unless the tensor is
    /// dense with exactly two dims.
    pub fn to_matrix(&self) -> Result<DenseMatrix> {
        match (&self.data, self.dims.as_slice()) {
            (TensorData::Dense(values), &[rows, cols]) => DenseMatrix::new(rows, cols, values.clone()),
            _ => Err(VargateError::config(format!(
                "tensor '{}' ({}, dims {:?}) is not a dense matrix",
                self.name,
                self.data.label(),
                self.dims
            ))),
        }
    }

    /// Prune and compact into a new CSR tensor (dense → CSR)
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] unless the tensor is a
    /// dense matrix and `ratio` is in `[0, 1)`.
    pub fn sparsify(&self, ratio: f32) -> Result<Self> {
        let pruned = prune_matrix(&self.to_matrix()?, ratio)?;
        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            kind: self.kind,
            data: TensorData::Csr(CsrMatrix::compact(&pruned)),
        })
    }

    /// Take the CSR matrix out, if that is the live representation
    #[must_use]
    pub fn into_csr(self) -> Option<CsrMatrix> {
        match self.data {
            TensorData::Csr(m) => Some(m),
            _ => None,
        }
    }
}
