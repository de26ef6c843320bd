//! Model construction from a parsed container

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, info};

use super::{LayerWeights, Model, ModelConfig, Projection, SparsitySummary, Vocabulary};
use crate::container::Container;
use crate::error::{Result, VargateError};
use crate::ops::{first_non_finite, DenseMatrix, MatVec};
use crate::sparse::SparsityConfig;
use crate::tensor::Tensor;

/// Decoded tensors by name, consumed as the weight set is assembled
struct TensorTable {
    tensors: HashMap<String, Tensor>,
}

impl TensorTable {
    fn decode(container: &Container, data: &[u8]) -> Result<Self> {
        let decoded = container
            .tensors
            .par_iter()
            .map(|desc| {
                let bytes = container.tensor_bytes(desc, data)?;
                Tensor::quantized(desc.name.clone(), desc.dims.clone(), desc.kind, bytes.to_vec())
                    .dequantize()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tensors: decoded
                .into_iter()
                .map(|t| (t.name().to_string(), t))
                .collect(),
        })
    }

    fn take(&mut self, name: &str) -> Result<Tensor> {
        self.tensors
            .remove(name)
            .ok_or_else(|| VargateError::format(format!("missing tensor {name}")))
    }

    fn vector(&mut self, name: &str, len: usize) -> Result<Vec<f32>> {
        let tensor = self.take(name)?;
        match (tensor.as_dense(), tensor.dims()) {
            (Some(values), &[n]) if n == len => Ok(values.to_vec()),
            _ => Err(VargateError::format(format!(
                "tensor {name} has shape {:?}, expected [{len}]",
                tensor.dims()
            ))),
        }
    }

    fn matrix(&mut self, name: &str, rows: usize, cols: usize) -> Result<Tensor> {
        let tensor = self.take(name)?;
        if tensor.dims() != [rows, cols] {
            return Err(VargateError::format(format!(
                "tensor {name} has shape {:?}, expected [{rows}, {cols}]",
                tensor.dims()
            )));
        }
        Ok(tensor)
    }
}

/// Wraps tensors into projections, pruning the ones the config selects
struct Sparsifier<'a> {
    config: &'a SparsityConfig,
    summary: SparsitySummary,
}

impl Sparsifier<'_> {
    fn projection(&mut self, tensor: &Tensor) -> Result<Projection> {
        let dense = tensor.to_matrix()?;
        let Some(ratio) = self.config.ratio_for(tensor.name()) else {
            return Ok(Projection::dense(dense));
        };

        let csr = tensor
            .sparsify(ratio)?
            .into_csr()
            .ok_or_else(|| VargateError::config(format!("sparsifying {} did not yield CSR", tensor.name())))?;
        debug!(
            tensor = tensor.name(),
            ratio,
            nnz = csr.nnz(),
            sparsity = csr.sparsity(),
            "compacted tensor to CSR"
        );
        self.summary.tensors.push(tensor.name().to_string());
        self.summary.nnz += csr.nnz();
        self.summary.total += dense.rows() * dense.cols();
        Ok(Projection::with_sparse(dense, csr))
    }
}

impl Model {
    /// Build a model from a parsed container and the bytes it was parsed from
    ///
    /// Decodes every tensor to f32 in parallel, checks shapes against the
    /// hyperparameters, runs the embedding sanity check when requested, then
    /// prunes and compacts the tensors `sparsity` selects. Sparsification
    /// happens here exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::FormatError`] for missing or misshapen tensors,
    /// a vocabulary that disagrees with the embedding table, or a non-finite
    /// first embedding row; [`VargateError::DecodeError`] from block decoding;
    /// [`VargateError::InvalidConfiguration`] for an invalid `sparsity`.
    pub fn from_container(
        container: &Container,
        data: &[u8],
        sparsity: &SparsityConfig,
        sanity_check: bool,
    ) -> Result<Self> {
        sparsity.validate()?;
        let config = ModelConfig::from_container(container)?;
        let vocab = Vocabulary::from_container(container)?;
        if vocab.len() != config.vocab_size {
            return Err(VargateError::format(format!(
                "vocabulary has {} tokens but token_embd.weight has {} rows",
                vocab.len(),
                config.vocab_size
            )));
        }

        let mut table = TensorTable::decode(container, data)?;
        let (hidden, kv_dim, ffn, vocab_size) = (
            config.hidden_dim,
            config.kv_dim(),
            config.intermediate_dim,
            config.vocab_size,
        );

        let embd_tensor = table.matrix("token_embd.weight", vocab_size, hidden)?;
        let token_embd = embd_tensor.to_matrix()?;
        if sanity_check {
            check_first_embedding_row(&token_embd)?;
        }

        let mut sparsifier = Sparsifier {
            config: sparsity,
            summary: SparsitySummary::default(),
        };

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let mut proj = |suffix: &str, rows: usize, cols: usize| -> Result<Projection> {
                let tensor = table.matrix(&format!("blk.{i}.{suffix}.weight"), rows, cols)?;
                sparsifier.projection(&tensor)
            };
            let attn_q = proj("attn_q", hidden, hidden)?;
            let attn_k = proj("attn_k", kv_dim, hidden)?;
            let attn_v = proj("attn_v", kv_dim, hidden)?;
            let attn_output = proj("attn_output", hidden, hidden)?;
            let ffn_gate = proj("ffn_gate", ffn, hidden)?;
            let ffn_up = proj("ffn_up", ffn, hidden)?;
            let ffn_down = proj("ffn_down", hidden, ffn)?;

            layers.push(LayerWeights {
                attn_norm: table.vector(&format!("blk.{i}.attn_norm.weight"), hidden)?,
                attn_q,
                attn_k,
                attn_v,
                attn_output,
                ffn_norm: table.vector(&format!("blk.{i}.ffn_norm.weight"), hidden)?,
                ffn_gate,
                ffn_up,
                ffn_down,
            });
        }

        let output_norm = table.vector("output_norm.weight", hidden)?;
        let output = if table.tensors.contains_key("output.weight") {
            let tensor = table.matrix("output.weight", vocab_size, hidden)?;
            sparsifier.projection(&tensor)?
        } else {
            debug!("output.weight absent, tying LM head to token_embd.weight");
            sparsifier.projection(&embd_tensor)?
        };

        if !table.tensors.is_empty() {
            let mut extra: Vec<_> = table.tensors.keys().cloned().collect();
            extra.sort();
            debug!(?extra, "ignoring tensors not used by the forward pass");
        }

        let summary = sparsifier.summary;
        info!(
            layers = config.num_layers,
            hidden_dim = config.hidden_dim,
            vocab = config.vocab_size,
            sparsified = summary.tensors.len(),
            achieved_sparsity = summary.achieved(),
            "model loaded"
        );

        Ok(Self {
            config,
            vocab,
            token_embd,
            layers,
            output_norm,
            output,
            sparsity: summary,
        })
    }
}

/// A misaligned data base shifts every tensor read; the first place it shows
/// is garbage (usually NaN) in the embedding table.
fn check_first_embedding_row(token_embd: &DenseMatrix) -> Result<()> {
    if token_embd.rows() == 0 {
        return Ok(());
    }
    if let Some(col) = first_non_finite(token_embd.row(0)) {
        return Err(VargateError::format(format!(
            "first embedding row has a non-finite value at column {col}; \
             the tensor data base is likely misaligned or the container is corrupt"
        )));
    }
    Ok(())
}
