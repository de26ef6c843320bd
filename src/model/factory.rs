//! Synthetic model containers
//!
//! Builds complete, loadable containers without fixture files. Weights follow
//! deterministic formulas, so every build of the same shape is byte-identical.
//!
//! # Example
//!
//! ```
//! use vargate::model::factory::SyntheticModel;
//!
//! let bytes = SyntheticModel::tiny().build().unwrap();
//! assert_eq!(&bytes[..4], b"VGTE");
//! ```

use crate::container::ContainerBuilder;
use crate::error::Result;
use crate::quantize::QuantKind;

/// How projection weights are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightPattern {
    /// Deterministic pseudo-random values: flat, uncertain predictions
    Mixed,
    /// Zero block weights and an LM head favouring token 0: every prediction
    /// is confident
    Peaked,
}

/// Shape and storage of a synthetic model
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    /// Vocabulary size
    pub vocab_size: usize,
    /// Hidden dimension
    pub hidden_dim: usize,
    /// FFN intermediate dimension
    pub intermediate_dim: usize,
    /// Number of layers
    pub num_layers: usize,
    /// Attention heads
    pub num_heads: usize,
    /// KV heads
    pub num_kv_heads: usize,
    /// Context length written to metadata
    pub context_length: usize,
    /// Storage kind of the 2-D projection weights
    pub weight_kind: QuantKind,
    /// Write a separate `output.weight` instead of tying to the embedding
    pub untied_output: bool,
    /// Weight fill
    pub pattern: WeightPattern,
}

impl SyntheticModel {
    /// Two layers, hidden 32, vocab 48, F32 weights
    #[must_use]
    pub fn tiny() -> Self {
        Self {
            vocab_size: 48,
            hidden_dim: 32,
            intermediate_dim: 64,
            num_layers: 2,
            num_heads: 4,
            num_kv_heads: 2,
            context_length: 128,
            weight_kind: QuantKind::F32,
            untied_output: true,
            pattern: WeightPattern::Mixed,
        }
    }

    /// Same shape as [`SyntheticModel::tiny`] with a confident LM head
    #[must_use]
    pub fn peaked() -> Self {
        Self {
            pattern: WeightPattern::Peaked,
            ..Self::tiny()
        }
    }

    /// Token strings `t0`, `t1`, ...
    #[must_use]
    pub fn token_strings(&self) -> Vec<String> {
        (0..self.vocab_size).map(|i| format!("t{i}")).collect()
    }

    /// Serialize to container bytes
    ///
    /// # Errors
    ///
    /// [`crate::VargateError::InvalidConfiguration`] if `weight_kind` has no
    /// encoder or the projection widths are not whole blocks of it.
    pub fn build(&self) -> Result<Vec<u8>> {
        let (vocab, hidden, ffn) = (self.vocab_size, self.hidden_dim, self.intermediate_dim);
        let kv_dim = self.num_kv_heads * (hidden / self.num_heads);
        let tokens = self.token_strings();
        let token_refs: Vec<&str> = tokens.iter().map(String::as_str).collect();

        let mut b = ContainerBuilder::new()
            .add_string("general.name", "synthetic")
            .block_count(self.num_layers as u32)
            .embedding_length(hidden as u32)
            .head_count(self.num_heads as u32)
            .head_count_kv(self.num_kv_heads as u32)
            .feed_forward_length(ffn as u32)
            .context_length(self.context_length as u32)
            .rope_freq_base(10_000.0)
            .rms_epsilon(1e-5)
            .tokens(&token_refs)
            .add_f32_tensor("token_embd.weight", &[vocab, hidden], &self.embedding())
            .add_f32_tensor("output_norm.weight", &[hidden], &vec![1.0; hidden]);

        for layer in 0..self.num_layers {
            b = b
                .add_f32_tensor(&format!("blk.{layer}.attn_norm.weight"), &[hidden], &vec![1.0; hidden])
                .add_f32_tensor(&format!("blk.{layer}.ffn_norm.weight"), &[hidden], &vec![1.0; hidden]);
            let projections = [
                ("attn_q", hidden, hidden),
                ("attn_k", kv_dim, hidden),
                ("attn_v", kv_dim, hidden),
                ("attn_output", hidden, hidden),
                ("ffn_gate", ffn, hidden),
                ("ffn_up", ffn, hidden),
                ("ffn_down", hidden, ffn),
            ];
            for (salt, (name, rows, cols)) in projections.into_iter().enumerate() {
                let values = self.projection(rows, cols, layer * 7 + salt + 1);
                b = b.add_quantized_tensor(
                    &format!("blk.{layer}.{name}.weight"),
                    &[rows, cols],
                    self.weight_kind,
                    &values,
                )?;
            }
        }

        if self.untied_output {
            b = b.add_quantized_tensor("output.weight", &[vocab, hidden], self.weight_kind, &self.head())?;
        }
        Ok(b.build())
    }

    fn embedding(&self) -> Vec<f32> {
        let n = self.vocab_size * self.hidden_dim;
        match self.pattern {
            WeightPattern::Mixed => (0..n).map(|i| formula(i, 0, 1.0)).collect(),
            WeightPattern::Peaked => vec![1.0; n],
        }
    }

    fn projection(&self, rows: usize, cols: usize, salt: usize) -> Vec<f32> {
        match self.pattern {
            WeightPattern::Mixed => {
                let scale = 1.0 / (cols as f32).sqrt();
                (0..rows * cols).map(|i| formula(i, salt, scale)).collect()
            },
            WeightPattern::Peaked => vec![0.0; rows * cols],
        }
    }

    fn head(&self) -> Vec<f32> {
        let (vocab, hidden) = (self.vocab_size, self.hidden_dim);
        match self.pattern {
            WeightPattern::Mixed => (0..vocab * hidden).map(|i| formula(i, 97, 0.5)).collect(),
            WeightPattern::Peaked => (0..vocab * hidden)
                .map(|i| if i < hidden { 1.0 } else { 0.0 })
                .collect(),
        }
    }
}

/// Deterministic value in `[-scale, scale)`
fn formula(i: usize, salt: usize, scale: f32) -> f32 {
    let h = (i.wrapping_mul(2_654_435_761) ^ salt.wrapping_mul(40_503)).wrapping_add(salt) % 1009;
    (h as f32 / 1009.0 * 2.0 - 1.0) * scale
}
