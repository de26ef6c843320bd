//! Hyperparameter extraction from container metadata

use serde::Serialize;

use crate::container::Container;
use crate::error::{Result, VargateError};

/// Metadata key prefix for model hyperparameters
pub const KEY_PREFIX: &str = "vargate";

const DEFAULT_ROPE_THETA: f32 = 10_000.0;
const DEFAULT_RMS_EPS: f32 = 1e-5;

/// Transformer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    /// Number of transformer layers
    pub num_layers: usize,
    /// Embedding dimension (hidden size)
    pub hidden_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Number of key-value heads (equal to `num_heads` without GQA)
    pub num_kv_heads: usize,
    /// FFN intermediate dimension
    pub intermediate_dim: usize,
    /// Vocabulary size (rows of the embedding table)
    pub vocab_size: usize,
    /// Maximum context length the model was built for
    pub context_length: usize,
    /// RoPE frequency base
    pub rope_theta: f32,
    /// RMSNorm epsilon
    pub eps: f32,
}

impl ModelConfig {
    /// Extract configuration from container metadata
    ///
    /// `vocab_size` comes from the embedding tensor's row count.
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] if a required key or the
    /// embedding tensor is missing, or the dimensions are inconsistent.
    pub fn from_container(container: &Container) -> Result<Self> {
        let required = |name: &str| -> Result<usize> {
            let key = format!("{KEY_PREFIX}.{name}");
            container
                .get_usize(&key)
                .ok_or_else(|| VargateError::format(format!("missing {key} in metadata")))
        };

        let num_layers = required("block_count")?;
        let hidden_dim = required("embedding_length")?;
        let num_heads = required("attention.head_count")?;
        let num_kv_heads = container
            .get_usize(&format!("{KEY_PREFIX}.attention.head_count_kv"))
            .unwrap_or(num_heads);
        let intermediate_dim = required("feed_forward_length")?;
        let context_length = required("context_length")?;
        let rope_theta = container
            .get_f32(&format!("{KEY_PREFIX}.rope.freq_base"))
            .unwrap_or(DEFAULT_ROPE_THETA);
        let eps = container
            .get_f32(&format!("{KEY_PREFIX}.attention.layer_norm_rms_epsilon"))
            .unwrap_or(DEFAULT_RMS_EPS);

        let vocab_size = container
            .tensor("token_embd.weight")
            .and_then(|t| t.dims.first().copied())
            .ok_or_else(|| VargateError::format("missing tensor token_embd.weight"))?;

        let config = Self {
            num_layers,
            hidden_dim,
            num_heads,
            num_kv_heads,
            intermediate_dim,
            vocab_size,
            context_length,
            rope_theta,
            eps,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let nonzero = [
            ("block_count", self.num_layers),
            ("embedding_length", self.hidden_dim),
            ("head_count", self.num_heads),
            ("head_count_kv", self.num_kv_heads),
            ("feed_forward_length", self.intermediate_dim),
            ("vocab_size", self.vocab_size),
            ("context_length", self.context_length),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(VargateError::format(format!("{name} must be nonzero")));
        }
        if self.hidden_dim % self.num_heads != 0 {
            return Err(VargateError::format(format!(
                "hidden dim {} not divisible by {} heads",
                self.hidden_dim, self.num_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(VargateError::format(format!(
                "head dim {} must be even for rotary encoding",
                self.head_dim()
            )));
        }
        if self.num_heads % self.num_kv_heads != 0 {
            return Err(VargateError::format(format!(
                "{} heads not divisible by {} KV heads",
                self.num_heads, self.num_kv_heads
            )));
        }
        if !(self.rope_theta.is_finite() && self.rope_theta > 0.0 && self.eps.is_finite() && self.eps >= 0.0) {
            return Err(VargateError::format("rope base and rms epsilon must be finite and positive"));
        }
        Ok(())
    }

    /// Dimension of one attention head
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }

    /// Width of one K or V row (`num_kv_heads * head_dim`)
    #[must_use]
    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim()
    }
}
