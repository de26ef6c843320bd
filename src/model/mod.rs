//! Loaded model: hyperparameters, vocabulary and weight set
//!
//! Built once by the loader and immutable afterwards. Every projection holds
//! its dense matrix and, when the sparsity configuration selected it, a CSR
//! copy of the pruned matrix for the sparse path.

mod config;
pub mod factory;
mod loader;
mod vocab;

pub use config::{ModelConfig, KEY_PREFIX};
pub use vocab::{Vocabulary, TOKENS_KEY, UNKNOWN_TOKEN};

use serde::{Deserialize, Serialize};

use crate::ops::{DenseMatrix, MatVec};
use crate::sparse::CsrMatrix;

/// Which weight set a forward pass reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputePath {
    /// Pruned CSR weights where available
    Sparse,
    /// Full dense weights
    Dense,
}

/// A projection matrix with an optional pruned variant
#[derive(Debug, Clone)]
pub struct Projection {
    dense: DenseMatrix,
    sparse: Option<CsrMatrix>,
}

impl Projection {
    /// Projection with only a dense matrix
    #[must_use]
    pub fn dense(dense: DenseMatrix) -> Self {
        Self { dense, sparse: None }
    }

    /// Projection with both representations
    #[must_use]
    pub fn with_sparse(dense: DenseMatrix, sparse: CsrMatrix) -> Self {
        Self {
            dense,
            sparse: Some(sparse),
        }
    }

    /// Matrix for a compute path; the sparse path falls back to dense for
    /// projections that were not pruned
    #[must_use]
    pub fn select(&self, path: ComputePath) -> &dyn MatVec {
        match (path, &self.sparse) {
            (ComputePath::Sparse, Some(csr)) => csr,
            _ => &self.dense,
        }
    }

    /// CSR variant, if pruned
    #[must_use]
    pub fn sparse(&self) -> Option<&CsrMatrix> {
        self.sparse.as_ref()
    }
}

/// Weights of one transformer block
#[derive(Debug, Clone)]
pub struct LayerWeights {
    /// Pre-attention RMSNorm weight `[hidden]`
    pub attn_norm: Vec<f32>,
    /// Query projection `[hidden, hidden]`
    pub attn_q: Projection,
    /// Key projection `[kv_dim, hidden]`
    pub attn_k: Projection,
    /// Value projection `[kv_dim, hidden]`
    pub attn_v: Projection,
    /// Attention output projection `[hidden, hidden]`
    pub attn_output: Projection,
    /// Pre-FFN RMSNorm weight `[hidden]`
    pub ffn_norm: Vec<f32>,
    /// FFN gate projection `[ffn, hidden]`
    pub ffn_gate: Projection,
    /// FFN up projection `[ffn, hidden]`
    pub ffn_up: Projection,
    /// FFN down projection `[hidden, ffn]`
    pub ffn_down: Projection,
}

/// Summary of the load-time sparsification pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SparsitySummary {
    /// Names of tensors that received a CSR variant
    pub tensors: Vec<String>,
    /// Stored entries across those tensors
    pub nnz: usize,
    /// Dense extent across those tensors
    pub total: usize,
}

impl SparsitySummary {
    /// Achieved sparsity over the pruned tensors (0 when none were pruned)
    #[must_use]
    pub fn achieved(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            1.0 - self.nnz as f32 / self.total as f32
        }
    }
}

/// Immutable model
#[derive(Debug, Clone)]
pub struct Model {
    /// Hyperparameters
    pub config: ModelConfig,
    /// Tokenizer vocabulary
    pub vocab: Vocabulary,
    /// Token embedding table `[vocab, hidden]`
    pub token_embd: DenseMatrix,
    /// Transformer blocks
    pub layers: Vec<LayerWeights>,
    /// Final RMSNorm weight `[hidden]`
    pub output_norm: Vec<f32>,
    /// LM head `[vocab, hidden]` (tied to the embedding when absent)
    pub output: Projection,
    /// What the sparsification pass produced
    pub sparsity: SparsitySummary,
}

impl Model {
    /// Embedding row of a token, if in range
    #[must_use]
    pub fn embedding(&self, token: u32) -> Option<&[f32]> {
        ((token as usize) < self.config.vocab_size).then(|| self.token_embd.row(token as usize))
    }
}
