//! Per-token forward pass as queued kernels
//!
//! A [`Workspace`] holds everything one session's forward passes touch: a
//! shared handle to the immutable model, the session's KV cache, activation
//! buffers, and per-path staging for K/V rows and logits. It lives on the
//! compute worker; the control thread only queues kernels against it.
//!
//! One forward pass at position `p` is:
//!
//! ```text
//! embed(token) → layer 0 → … → layer L-1 → [output head]
//! ```
//!
//! Each layer computes its K/V row, attends over the cached rows `0..p` plus
//! that staged row, and leaves the row staged for its path. Nothing reaches
//! the cache until [`Workspace::commit`] copies one path's staged rows in, so
//! the sparse and dense passes of a dual-compare step see identical context.

mod attention;

use std::sync::Arc;

use crate::compute::ComputeQueue;
use crate::error::{CacheError, Result, VargateError};
use crate::kv_cache::KvCache;
use crate::model::{ComputePath, Model};
use crate::ops::{apply_rope, first_non_finite, rms_norm_into, silu, MatVec};

use self::attention::{attend, HeadLayout};

/// Staging slot per compute path
#[derive(Debug, Clone, Default)]
struct PathBuffers {
    /// Staged K row per layer
    keys: Vec<Vec<f32>>,
    /// Staged V row per layer
    values: Vec<Vec<f32>>,
    /// Position the staged rows belong to
    position: Option<usize>,
    /// Output logits of the last head run on this path
    logits: Vec<f32>,
}

impl PathBuffers {
    fn new(num_layers: usize, kv_dim: usize, vocab: usize) -> Self {
        Self {
            keys: vec![vec![0.0; kv_dim]; num_layers],
            values: vec![vec![0.0; kv_dim]; num_layers],
            position: None,
            logits: vec![0.0; vocab],
        }
    }
}

/// Session-owned forward-pass state
#[derive(Debug)]
pub struct Workspace {
    model: Arc<Model>,
    cache: KvCache,
    /// Residual stream, also the layer input buffer
    hidden: Vec<f32>,
    normed: Vec<f32>,
    q: Vec<f32>,
    attn_out: Vec<f32>,
    proj: Vec<f32>,
    ffn_gate: Vec<f32>,
    ffn_up: Vec<f32>,
    scores: Vec<f32>,
    sparse: PathBuffers,
    dense: PathBuffers,
}

impl Workspace {
    /// Allocate buffers for `model` with a cache of `capacity` positions
    #[must_use]
    pub fn new(model: Arc<Model>, capacity: usize) -> Self {
        let c = &model.config;
        let (hidden, kv_dim, ffn, vocab) = (c.hidden_dim, c.kv_dim(), c.intermediate_dim, c.vocab_size);
        let cache = KvCache::new(c.num_layers, kv_dim, capacity);
        let sparse = PathBuffers::new(c.num_layers, kv_dim, vocab);
        let dense = sparse.clone();
        Self {
            cache,
            hidden: vec![0.0; hidden],
            normed: vec![0.0; hidden],
            q: vec![0.0; hidden],
            attn_out: vec![0.0; hidden],
            proj: vec![0.0; hidden],
            ffn_gate: vec![0.0; ffn],
            ffn_up: vec![0.0; ffn],
            scores: Vec::with_capacity(capacity),
            sparse,
            dense,
            model,
        }
    }

    /// Session KV cache
    #[must_use]
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Logits last produced on `path`
    #[must_use]
    pub fn logits(&self, path: ComputePath) -> &[f32] {
        &self.buffers(path).logits
    }

    fn buffers(&self, path: ComputePath) -> &PathBuffers {
        match path {
            ComputePath::Sparse => &self.sparse,
            ComputePath::Dense => &self.dense,
        }
    }

    /// Copy the token's embedding into the layer input buffer
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] for a token outside the vocabulary.
    pub fn embed(&mut self, token: u32) -> Result<()> {
        let row = self.model.embedding(token).ok_or_else(|| {
            VargateError::config(format!(
                "token {token} outside vocabulary of {}",
                self.model.config.vocab_size
            ))
        })?;
        self.hidden.copy_from_slice(row);
        Ok(())
    }

    /// Run one transformer block on the residual stream
    ///
    /// # Errors
    ///
    /// [`VargateError::Cache`] if the cache does not hold exactly `position`
    /// rows for this layer, [`VargateError::GenerationError`] if the block
    /// output is non-finite.
    pub fn forward_layer(&mut self, layer: usize, path: ComputePath, position: usize) -> Result<()> {
        let model = Arc::clone(&self.model);
        let weights = &model.layers[layer];
        let config = &model.config;
        let head_dim = config.head_dim();

        // Attention block
        rms_norm_into(&self.hidden, &weights.attn_norm, config.eps, &mut self.normed);
        weights.attn_q.select(path).matvec_into(&self.normed, &mut self.q);
        apply_rope(&mut self.q, position, head_dim, config.rope_theta);

        let staged = match path {
            ComputePath::Sparse => &mut self.sparse,
            ComputePath::Dense => &mut self.dense,
        };
        let (key, value) = (&mut staged.keys[layer], &mut staged.values[layer]);
        weights.attn_k.select(path).matvec_into(&self.normed, key);
        weights.attn_v.select(path).matvec_into(&self.normed, value);
        apply_rope(key, position, head_dim, config.rope_theta);
        staged.position = Some(position);

        let cached = self.cache.layer_len(layer);
        if cached != position {
            return Err(CacheError::OutOfOrder {
                layer,
                expected: cached,
                got: position,
            }
            .into());
        }
        let context = match position {
            0 => None,
            p => Some(self.cache.read(layer, p - 1)?),
        };

        let layout = HeadLayout {
            num_heads: config.num_heads,
            num_kv_heads: config.num_kv_heads,
            head_dim,
        };
        attend(&self.q, context.as_ref(), key, value, layout, &mut self.scores, &mut self.attn_out);
        weights.attn_output.select(path).matvec_into(&self.attn_out, &mut self.proj);
        for (h, p) in self.hidden.iter_mut().zip(&self.proj) {
            *h += p;
        }

        // Gated feed-forward block
        rms_norm_into(&self.hidden, &weights.ffn_norm, config.eps, &mut self.normed);
        weights.ffn_gate.select(path).matvec_into(&self.normed, &mut self.ffn_gate);
        weights.ffn_up.select(path).matvec_into(&self.normed, &mut self.ffn_up);
        silu(&mut self.ffn_gate);
        for (g, u) in self.ffn_gate.iter_mut().zip(&self.ffn_up) {
            *g *= u;
        }
        weights.ffn_down.select(path).matvec_into(&self.ffn_gate, &mut self.proj);
        for (h, p) in self.hidden.iter_mut().zip(&self.proj) {
            *h += p;
        }

        if let Some(idx) = first_non_finite(&self.hidden) {
            return Err(VargateError::GenerationError {
                layer: Some(layer),
                position,
                reason: format!(
                    "non-finite hidden state {} at index {idx} on the {path:?} path",
                    self.hidden[idx]
                ),
            });
        }
        Ok(())
    }

    /// Final norm and LM head into the path's logits buffer
    ///
    /// # Errors
    ///
    /// [`VargateError::GenerationError`] with `layer: None` for non-finite logits.
    pub fn output_head(&mut self, path: ComputePath, position: usize) -> Result<()> {
        let model = Arc::clone(&self.model);
        rms_norm_into(&self.hidden, &model.output_norm, model.config.eps, &mut self.normed);
        let logits = match path {
            ComputePath::Sparse => &mut self.sparse.logits,
            ComputePath::Dense => &mut self.dense.logits,
        };
        model.output.select(path).matvec_into(&self.normed, logits);
        if let Some(idx) = first_non_finite(logits) {
            return Err(VargateError::GenerationError {
                layer: None,
                position,
                reason: format!("non-finite logit {} for token {idx} on the {path:?} path", logits[idx]),
            });
        }
        Ok(())
    }

    /// Append the K/V rows staged on `path` to the cache at `position`
    ///
    /// # Errors
    ///
    /// [`VargateError::Cache`] on an integrity violation, or if the staged
    /// rows belong to another position.
    pub fn commit(&mut self, path: ComputePath, position: usize) -> Result<()> {
        let staged = match path {
            ComputePath::Sparse => &mut self.sparse,
            ComputePath::Dense => &mut self.dense,
        };
        if staged.position != Some(position) {
            return Err(CacheError::OutOfOrder {
                layer: 0,
                expected: self.cache.layer_len(0),
                got: position,
            }
            .into());
        }
        for (layer, (k, v)) in staged.keys.iter().zip(&staged.values).enumerate() {
            self.cache.append(layer, position, k, v)?;
        }
        staged.position = None;
        Ok(())
    }

    /// Clear the cache and staging for a new session
    pub fn reset(&mut self) {
        self.cache.reset();
        self.sparse.position = None;
        self.dense.position = None;
    }
}

/// Queue a full forward pass for `token` at `position` on `path`
///
/// With `with_logits` the output head runs too; prefill skips it.
pub fn queue_forward(
    queue: &ComputeQueue<Workspace>,
    num_layers: usize,
    token: u32,
    position: usize,
    path: ComputePath,
    with_logits: bool,
) {
    queue.submit(move |ws| ws.embed(token));
    for layer in 0..num_layers {
        queue.submit(move |ws| ws.forward_layer(layer, path, position));
    }
    if with_logits {
        queue.submit(move |ws| ws.output_head(path, position));
    }
}

/// Queue the commit of `path`'s staged K/V rows
pub fn queue_commit(queue: &ComputeQueue<Workspace>, path: ComputePath, position: usize) {
    queue.submit(move |ws| ws.commit(path, position));
}
