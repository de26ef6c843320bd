//! Container writer
//!
//! `ContainerBuilder` produces valid containers in memory. Tests and benches
//! use it to synthesize models without fixture files; conversion tooling
//! uses it to write real ones.
//!
//! # Example
//!
//! ```
//! use vargate::container::{Container, ContainerBuilder};
//!
//! let bytes = ContainerBuilder::new()
//!     .block_count(1)
//!     .embedding_length(4)
//!     .add_f32_tensor("output_norm.weight", &[4], &[1.0; 4])
//!     .build();
//! let container = Container::from_bytes(&bytes).unwrap();
//! assert_eq!(container.tensors.len(), 1);
//! ```

use super::types::{data_base_for, MetaValue, ALIGNMENT, CONTAINER_MAGIC, CONTAINER_VERSION, PREAMBLE_LEN};
use crate::error::Result;
use crate::quantize::{quantize, QuantKind};

/// Builder for model containers
#[derive(Debug, Default, Clone)]
pub struct ContainerBuilder {
    /// Metadata key-value pairs, in insertion order
    metadata: Vec<(String, MetaValue)>,
    /// Tensors (name, dims, kind, bytes)
    tensors: Vec<(String, Vec<usize>, QuantKind, Vec<u8>)>,
}

impl ContainerBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Metadata Helpers
    // =========================================================================

    /// Add an arbitrary metadata value
    #[must_use]
    pub fn add_meta(mut self, key: &str, value: MetaValue) -> Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    /// Add a string metadata value
    #[must_use]
    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add_meta(key, MetaValue::String(value.to_string()))
    }

    /// Add a u32 metadata value
    #[must_use]
    pub fn add_u32(self, key: &str, value: u32) -> Self {
        self.add_meta(key, MetaValue::UInt32(value))
    }

    /// Add a f32 metadata value
    #[must_use]
    pub fn add_f32(self, key: &str, value: f32) -> Self {
        self.add_meta(key, MetaValue::Float32(value))
    }

    /// Add a string array metadata value
    #[must_use]
    pub fn add_string_array(self, key: &str, values: &[&str]) -> Self {
        let items = values.iter().map(|v| MetaValue::String((*v).to_string())).collect();
        self.add_meta(key, MetaValue::Array(items))
    }

    /// Set number of layers (`vargate.block_count`)
    #[must_use]
    pub fn block_count(self, count: u32) -> Self {
        self.add_u32("vargate.block_count", count)
    }

    /// Set hidden dimension (`vargate.embedding_length`)
    #[must_use]
    pub fn embedding_length(self, dim: u32) -> Self {
        self.add_u32("vargate.embedding_length", dim)
    }

    /// Set number of attention heads
    #[must_use]
    pub fn head_count(self, count: u32) -> Self {
        self.add_u32("vargate.attention.head_count", count)
    }

    /// Set number of KV heads (grouped-query attention)
    #[must_use]
    pub fn head_count_kv(self, count: u32) -> Self {
        self.add_u32("vargate.attention.head_count_kv", count)
    }

    /// Set FFN intermediate dimension
    #[must_use]
    pub fn feed_forward_length(self, dim: u32) -> Self {
        self.add_u32("vargate.feed_forward_length", dim)
    }

    /// Set context length
    #[must_use]
    pub fn context_length(self, len: u32) -> Self {
        self.add_u32("vargate.context_length", len)
    }

    /// Set RoPE frequency base
    #[must_use]
    pub fn rope_freq_base(self, base: f32) -> Self {
        self.add_f32("vargate.rope.freq_base", base)
    }

    /// Set RMS norm epsilon
    #[must_use]
    pub fn rms_epsilon(self, eps: f32) -> Self {
        self.add_f32("vargate.attention.layer_norm_rms_epsilon", eps)
    }

    /// Set the tokenizer vocabulary
    #[must_use]
    pub fn tokens(self, tokens: &[&str]) -> Self {
        self.add_string_array("tokenizer.tokens", tokens)
    }

    // =========================================================================
    // Tensor Helpers
    // =========================================================================

    /// Add a tensor from pre-encoded bytes
    ///
    /// The declared byte length is `data.len()`; the reader rejects it if that
    /// disagrees with the kind's block arithmetic.
    #[must_use]
    pub fn add_raw_tensor(mut self, name: &str, dims: &[usize], kind: QuantKind, data: Vec<u8>) -> Self {
        self.tensors.push((name.to_string(), dims.to_vec(), kind, data));
        self
    }

    /// Add an F32 tensor
    #[must_use]
    pub fn add_f32_tensor(self, name: &str, dims: &[usize], data: &[f32]) -> Self {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_raw_tensor(name, dims, QuantKind::F32, bytes)
    }

    /// Encode `data` in `kind` and add it
    ///
    /// # Errors
    ///
    /// Returns [`crate::VargateError::InvalidConfiguration`] if `kind` has no
    /// encoder or `data` is not a whole number of blocks.
    pub fn add_quantized_tensor(self, name: &str, dims: &[usize], kind: QuantKind, data: &[f32]) -> Result<Self> {
        let bytes = quantize(kind, data)?;
        Ok(self.add_raw_tensor(name, dims, kind, bytes))
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serialize the container
    ///
    /// Tensor spans are placed back-to-back, each starting on an
    /// [`ALIGNMENT`] boundary, with offsets relative to the floor-aligned base.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        // Descriptor fields are fixed width, so the metadata length does not
        // depend on the offset values written into it.
        let placeholder = self.encode_metadata(&vec![0; self.tensors.len()]);
        let metadata_end = PREAMBLE_LEN + placeholder.len();
        let data_base = data_base_for(metadata_end);

        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = align_up(metadata_end);
        for (_, _, _, data) in &self.tensors {
            offsets.push((cursor - data_base) as u64);
            cursor = align_up(cursor + data.len());
        }

        let meta = self.encode_metadata(&offsets);
        let mut out = Vec::with_capacity(cursor);
        out.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        out.extend_from_slice(&(meta.len() as u64).to_le_bytes());
        out.extend_from_slice(&meta);

        for ((_, _, _, data), &offset) in self.tensors.iter().zip(&offsets) {
            out.resize(data_base + offset as usize, 0);
            out.extend_from_slice(data);
        }
        out
    }

    fn encode_metadata(&self, offsets: &[u64]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            write_string(&mut out, key);
            out.extend_from_slice(&value.type_id().to_le_bytes());
            write_value(&mut out, value);
        }

        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        for ((name, dims, kind, data), offset) in self.tensors.iter().zip(offsets) {
            write_string(&mut out, name);
            out.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for &dim in dims {
                out.extend_from_slice(&(dim as u64).to_le_bytes());
            }
            out.extend_from_slice(&kind.id().to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        }
        out
    }
}

fn align_up(offset: usize) -> usize {
    offset.div_ceil(ALIGNMENT) * ALIGNMENT
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &MetaValue) {
    match value {
        MetaValue::UInt8(v) => out.push(*v),
        MetaValue::Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Float32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Bool(v) => out.push(u8::from(*v)),
        MetaValue::String(s) => write_string(out, s),
        MetaValue::Array(items) => {
            let elem_type = items.first().map_or(8, MetaValue::type_id);
            out.extend_from_slice(&elem_type.to_le_bytes());
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(out, item);
            }
        },
        MetaValue::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetaValue::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
}
