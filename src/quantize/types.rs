//! Quantization kind definitions and block geometry
//!
//! Every kind packs a fixed number of elements per block into a fixed number
//! of bytes. Tensor byte spans are validated against this table before any
//! decoding happens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Elements per block for the 32-element formats
pub const BLOCK_SIZE: usize = 32;

/// Elements per super-block for the K-quant formats
pub const QK_K: usize = 256;

/// Bytes of packed 6-bit scales/mins in a `Q4_K`/`Q5_K` super-block
pub const K_SCALE_SIZE: usize = 12;

/// Quantization kind of a stored tensor
///
/// The numeric ids are the on-disk kind ids of the container format.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantKind {
    /// Unquantized IEEE 754 single precision
    F32,
    /// IEEE 754 half precision
    F16,
    /// 4-bit, one f16 scale per 32 elements
    Q4_0,
    /// 4-bit, f16 scale and min per 32 elements
    Q4_1,
    /// 5-bit, one f16 scale per 32 elements
    Q5_0,
    /// 5-bit, f16 scale and min per 32 elements
    Q5_1,
    /// 8-bit, one f16 scale per 32 elements
    Q8_0,
    /// 2-bit K-quant super-block
    Q2_K,
    /// 4-bit K-quant super-block with 6-bit sub-block scales and mins
    Q4_K,
    /// 5-bit K-quant super-block with 6-bit sub-block scales and mins
    Q5_K,
    /// 6-bit K-quant super-block with 8-bit sub-block scales
    Q6_K,
}

impl QuantKind {
    /// All supported kinds, in id order
    pub const ALL: [QuantKind; 11] = [
        QuantKind::F32,
        QuantKind::F16,
        QuantKind::Q4_0,
        QuantKind::Q4_1,
        QuantKind::Q5_0,
        QuantKind::Q5_1,
        QuantKind::Q8_0,
        QuantKind::Q2_K,
        QuantKind::Q4_K,
        QuantKind::Q5_K,
        QuantKind::Q6_K,
    ];

    /// On-disk kind id
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::Q4_0 => 2,
            Self::Q4_1 => 3,
            Self::Q5_0 => 6,
            Self::Q5_1 => 7,
            Self::Q8_0 => 8,
            Self::Q2_K => 10,
            Self::Q4_K => 12,
            Self::Q5_K => 13,
            Self::Q6_K => 14,
        }
    }

    /// Look up a kind by its on-disk id
    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    /// Elements per block
    #[must_use]
    pub const fn block_elems(self) -> usize {
        match self {
            Self::F32 | Self::F16 => 1,
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 | Self::Q8_0 => BLOCK_SIZE,
            Self::Q2_K | Self::Q4_K | Self::Q5_K | Self::Q6_K => QK_K,
        }
    }

    /// Bytes per block
    #[must_use]
    pub const fn block_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::Q4_0 => 2 + 16,
            Self::Q4_1 => 2 + 2 + 16,
            Self::Q5_0 => 2 + 4 + 16,
            Self::Q5_1 => 2 + 2 + 4 + 16,
            Self::Q8_0 => 2 + 32,
            Self::Q2_K => 16 + 64 + 2 + 2,
            Self::Q4_K => 2 + 2 + K_SCALE_SIZE + 128,
            Self::Q5_K => 2 + 2 + K_SCALE_SIZE + 32 + 128,
            Self::Q6_K => 128 + 64 + 16 + 2,
        }
    }

    /// Byte length of `n_elements` values stored in this kind
    ///
    /// Returns `None` when `n_elements` is not a whole number of blocks.
    #[must_use]
    pub fn byte_len(self, n_elements: usize) -> Option<usize> {
        if n_elements % self.block_elems() != 0 {
            return None;
        }
        (n_elements / self.block_elems()).checked_mul(self.block_bytes())
    }

    /// Whether values are block-quantized (as opposed to plain floats)
    #[must_use]
    pub const fn is_quantized(self) -> bool {
        !matches!(self, Self::F32 | Self::F16)
    }

    /// Average storage cost in bits per weight
    #[must_use]
    pub fn bits_per_weight(self) -> f32 {
        (self.block_bytes() * 8) as f32 / self.block_elems() as f32
    }
}

impl fmt::Display for QuantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q2_K => "Q2_K",
            Self::Q4_K => "Q4_K",
            Self::Q5_K => "Q5_K",
            Self::Q6_K => "Q6_K",
        };
        f.write_str(name)
    }
}
