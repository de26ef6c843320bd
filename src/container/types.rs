//! Container type definitions and constants
//!
//! Core types for the packed model container: magic and version, alignment,
//! metadata values and tensor descriptors.

use std::collections::HashMap;

use crate::quantize::QuantKind;

/// Container magic number: "VGTE" in little-endian
pub const CONTAINER_MAGIC: u32 = u32::from_le_bytes(*b"VGTE");

/// Supported container version
pub const CONTAINER_VERSION: u32 = 1;

/// Byte boundary the tensor-data base is aligned to
pub const ALIGNMENT: usize = 32;

/// Size of the fixed preamble: magic (u32) + version (u32) + meta_len (u64)
pub const PREAMBLE_LEN: usize = 16;

/// Upper bound on tensor descriptors (corruption guard)
pub const MAX_TENSOR_COUNT: u64 = 100_000;

/// Upper bound on metadata entries (corruption guard)
pub const MAX_METADATA_COUNT: u64 = 10_000;

/// Upper bound on tensor rank
pub const MAX_DIMS: u32 = 8;

/// Upper bound on metadata array length
pub const MAX_ARRAY_LEN: u64 = 10_000_000;

/// Metadata value types
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Signed 8-bit integer
    Int8(i8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Signed 16-bit integer
    Int16(i16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Signed 32-bit integer
    Int32(i32),
    /// 32-bit floating point
    Float32(f32),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    String(String),
    /// Array of values
    Array(Vec<MetaValue>),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Signed 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
}

impl MetaValue {
    /// On-disk type id
    #[must_use]
    pub fn type_id(&self) -> u32 {
        match self {
            Self::UInt8(_) => 0,
            Self::Int8(_) => 1,
            Self::UInt16(_) => 2,
            Self::Int16(_) => 3,
            Self::UInt32(_) => 4,
            Self::Int32(_) => 5,
            Self::Float32(_) => 6,
            Self::Bool(_) => 7,
            Self::String(_) => 8,
            Self::Array(_) => 9,
            Self::UInt64(_) => 10,
            Self::Int64(_) => 11,
            Self::Float64(_) => 12,
        }
    }

    /// Integer view of any non-negative integer variant
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            Self::UInt8(v) => Some(usize::from(v)),
            Self::UInt16(v) => Some(usize::from(v)),
            Self::UInt32(v) => usize::try_from(v).ok(),
            Self::UInt64(v) => usize::try_from(v).ok(),
            Self::Int32(v) => usize::try_from(v).ok(),
            Self::Int64(v) => usize::try_from(v).ok(),
            _ => None,
        }
    }

    /// Float view of any float variant
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float32(v) => Some(v),
            Self::Float64(v) => Some(v as f32),
            _ => None,
        }
    }

    /// String view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Fixed container preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Magic number (must be `CONTAINER_MAGIC`)
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Length in bytes of the metadata section that follows the preamble
    pub meta_len: u64,
}

/// Tensor descriptor as stored in the metadata section
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescriptor {
    /// Unique tensor name
    pub name: String,
    /// Logical shape, row-major (`[rows, cols]` for matrices)
    pub dims: Vec<usize>,
    /// Storage kind
    pub kind: QuantKind,
    /// Offset of the tensor bytes relative to the data base
    pub offset: u64,
    /// Length of the tensor byte span
    pub byte_len: u64,
}

impl TensorDescriptor {
    /// Number of logical elements
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Parsed container: header, metadata, descriptors and the data base offset
#[derive(Debug, Clone)]
pub struct Container {
    /// Fixed preamble
    pub header: ContainerHeader,
    /// Metadata key-value pairs
    pub metadata: HashMap<String, MetaValue>,
    /// Tensor descriptors, in file order
    pub tensors: Vec<TensorDescriptor>,
    /// Absolute offset one past the metadata section
    pub metadata_end: usize,
    /// Absolute offset tensor offsets are relative to
    pub data_base: usize,
}

/// Round `offset` down to a multiple of [`ALIGNMENT`]
///
/// The data base is floor-aligned. Rounding up instead shifts every tensor
/// read by up to `ALIGNMENT - 1` bytes and surfaces as NaN activations, not as
/// a load error.
#[inline]
#[must_use]
pub const fn data_base_for(metadata_end: usize) -> usize {
    metadata_end / ALIGNMENT * ALIGNMENT
}
