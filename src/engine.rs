//! Engine handle, sessions, and the gated generation loop
//!
//! An [`Engine`] owns the immutable [`Model`]. Each [`Session`] owns its own
//! KV cache and [`GenerationState`] (inside a compute-queue workspace), so two
//! sessions never share either.
//!
//! ```text
//! prompt[..n-1] ──dense──▶ cache          (prefill, no readback)
//! step p:  sparse forward ─▶ fence ─▶ quick entropy ─▶ gate
//!            SparseOnly  : commit sparse K/V
//!            DualCompare : dense forward ─▶ fence ─▶ energy diff ─▶ commit dense K/V
//!          sample ─▶ history
//! ```

use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compute::ComputeQueue;
use crate::container::Container;
use crate::entropy::{quick_entropy, DEFAULT_SAMPLE_SIZE};
use crate::error::{Result, VargateError};
use crate::gate::{energy_difference, GateDecision, VariationalGate};
use crate::model::{ComputePath, Model};
use crate::pipeline::{queue_commit, queue_forward, Workspace};
use crate::sampler::{sample_token, SamplingConfig};
use crate::sparse::SparsityConfig;
use crate::stats::GenerationStats;

/// Engine-wide limits fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Upper bound on any session's context, whatever the request asks for
    pub max_context: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self { max_context: 4096 }
    }
}

/// Load-time engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard limits for every session
    pub limits: EngineLimits,
    /// Tensors to prune and compact at load
    pub sparsity: SparsityConfig,
    /// Logits sampled by the quick entropy estimator
    pub estimator_sample_size: usize,
    /// Reject models whose first embedding row decodes non-finite
    pub sanity_check: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: EngineLimits::default(),
            sparsity: SparsityConfig::none(),
            estimator_sample_size: DEFAULT_SAMPLE_SIZE,
            sanity_check: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; omitted fields take their defaults
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] for malformed JSON or bad values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VargateError::config(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    ///
    /// # Errors
    ///
    /// [`VargateError::Io`] if the file cannot be read, otherwise as
    /// [`EngineConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] naming the bad field.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_context == 0 {
            return Err(VargateError::config("limits.max_context must be positive"));
        }
        if self.estimator_sample_size == 0 {
            return Err(VargateError::config("estimator_sample_size must be positive"));
        }
        self.sparsity.validate()
    }
}

/// Per-session position, history, and counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationState {
    /// Next cache position to be written
    pub position: usize,
    /// Prompt followed by every sampled token
    pub history: Vec<u32>,
    /// Gate counters
    pub stats: GenerationStats,
}

/// A loaded model ready to serve sessions
#[derive(Debug)]
pub struct Engine {
    model: Arc<Model>,
    config: EngineConfig,
    last_stats: GenerationStats,
}

impl Engine {
    /// Memory-map and load a container file
    ///
    /// # Errors
    ///
    /// [`VargateError::Io`] if the file cannot be opened or mapped, otherwise
    /// as [`Engine::from_bytes`].
    pub fn load(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only and dropped before load returns;
        // every tensor is decoded into owned buffers first.
        let mmap = unsafe { Mmap::map(&file)? };
        let engine = Self::from_bytes(&mmap, config)?;
        info!(path = %path.as_ref().display(), bytes = mmap.len(), "model file loaded");
        Ok(engine)
    }

    /// Load a container already in memory
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] for a bad `config`,
    /// [`VargateError::FormatError`] or [`VargateError::DecodeError`] for a
    /// bad container.
    pub fn from_bytes(data: &[u8], config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let container = Container::from_bytes(data)?;
        let model = Model::from_container(&container, data, &config.sparsity, config.sanity_check)?;
        Ok(Self {
            model: Arc::new(model),
            config,
            last_stats: GenerationStats::default(),
        })
    }

    /// Loaded model
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Configuration the engine was loaded with
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counters from the last `generate` call
    #[must_use]
    pub fn stats(&self) -> GenerationStats {
        self.last_stats
    }

    /// Start an independent session with its own cache and state
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] for a bad `sampling`, or
    /// [`VargateError::Io`] if the compute worker cannot start.
    pub fn session(&self, sampling: &SamplingConfig) -> Result<Session> {
        Session::new(Arc::clone(&self.model), &self.config, sampling)
    }

    /// Generate up to `max_tokens` tokens after `prompt`
    ///
    /// Runs a fresh session and keeps its counters for [`Engine::stats`],
    /// including when generation fails part way.
    ///
    /// # Errors
    ///
    /// See [`Session::generate`].
    pub fn generate(&mut self, prompt: &[u32], max_tokens: usize, sampling: &SamplingConfig) -> Result<Vec<u32>> {
        let mut session = self.session(sampling)?;
        let result = session.generate(prompt, max_tokens);
        self.last_stats = session.stats();
        result
    }
}

/// One generation session
///
/// Owns a compute queue whose workspace holds the session's KV cache. Every
/// public method returns only after its fences have been waited on, so a
/// session can be dropped between any two calls.
#[derive(Debug)]
pub struct Session {
    model: Arc<Model>,
    queue: ComputeQueue<Workspace>,
    sampling: SamplingConfig,
    gate: VariationalGate,
    rng: StdRng,
    sample_size: usize,
    ceiling: usize,
    state: GenerationState,
}

impl Session {
    fn new(model: Arc<Model>, config: &EngineConfig, sampling: &SamplingConfig) -> Result<Self> {
        sampling.validate()?;
        let ceiling = sampling
            .max_context
            .min(config.limits.max_context)
            .min(model.config.context_length);
        let workspace = Workspace::new(Arc::clone(&model), ceiling);
        Ok(Self {
            queue: ComputeQueue::new(workspace)?,
            gate: VariationalGate::new(sampling.entropy_gate_threshold)?,
            rng: StdRng::seed_from_u64(sampling.seed),
            sample_size: config.estimator_sample_size,
            sampling: sampling.clone(),
            ceiling,
            state: GenerationState::default(),
            model,
        })
    }

    /// Effective context ceiling for this session
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Position, history, and counters
    #[must_use]
    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// Counters so far; safe to read between steps
    #[must_use]
    pub fn stats(&self) -> GenerationStats {
        self.state.stats
    }

    /// Clear cache, history, counters, gate, and RNG for a new prompt
    ///
    /// Runs even when an earlier kernel faulted unobserved; that fault is
    /// discarded with the state it belonged to.
    ///
    /// # Errors
    ///
    /// [`VargateError::ComputeUnavailable`] if the compute worker is gone.
    pub fn reset(&mut self) -> Result<()> {
        self.queue.recover(Workspace::reset).wait()?;
        self.state = GenerationState::default();
        self.gate.reset();
        self.rng = StdRng::seed_from_u64(self.sampling.seed);
        Ok(())
    }

    /// Queue the prompt into the cache
    ///
    /// Every token but the last runs the dense path and is committed; the
    /// last one is fed by the first [`Session::step`].
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] for an empty prompt, a token
    /// outside the vocabulary, or a session that already holds a prompt;
    /// [`VargateError::ContextLimitExceeded`] if the prompt does not fit.
    pub fn prefill(&mut self, prompt: &[u32]) -> Result<()> {
        if !self.state.history.is_empty() {
            return Err(VargateError::config("session already holds a prompt; reset it first"));
        }
        if prompt.is_empty() {
            return Err(VargateError::config("prompt must contain at least one token"));
        }
        if prompt.len() > self.ceiling {
            return Err(VargateError::ContextLimitExceeded {
                requested: prompt.len(),
                limit: self.ceiling,
            });
        }
        let vocab = self.model.config.vocab_size;
        if let Some(&token) = prompt.iter().find(|&&t| t as usize >= vocab) {
            return Err(VargateError::config(format!("prompt token {token} outside vocabulary of {vocab}")));
        }

        let num_layers = self.model.config.num_layers;
        for (position, &token) in prompt[..prompt.len() - 1].iter().enumerate() {
            queue_forward(&self.queue, num_layers, token, position, ComputePath::Dense, false);
            queue_commit(&self.queue, ComputePath::Dense, position);
        }
        self.state.position = prompt.len() - 1;
        self.state.history.extend_from_slice(prompt);
        Ok(())
    }

    /// Produce one token
    ///
    /// # Errors
    ///
    /// [`VargateError::ContextLimitExceeded`] if the ceiling is reached,
    /// [`VargateError::GenerationError`] for non-finite activations, a
    /// [`VargateError::Cache`] integrity fault from an earlier commit, or
    /// [`VargateError::InvalidConfiguration`] before [`Session::prefill`].
    pub fn step(&mut self) -> Result<u32> {
        let Some(&token) = self.state.history.last() else {
            return Err(VargateError::config("step called before prefill"));
        };
        // The sampled token must still fit under the ceiling
        if self.state.history.len() >= self.ceiling {
            return Err(VargateError::ContextLimitExceeded {
                requested: self.state.history.len() + 1,
                limit: self.ceiling,
            });
        }
        let position = self.state.position;
        let num_layers = self.model.config.num_layers;

        queue_forward(&self.queue, num_layers, token, position, ComputePath::Sparse, true);
        let sparse = self
            .queue
            .fence(|ws| Ok(ws.logits(ComputePath::Sparse).to_vec()))
            .wait()?;

        let entropy = quick_entropy(&sparse, self.sample_size);
        let decision = self.gate.decide(entropy);
        let (logits, energy) = match decision {
            GateDecision::SparseOnly => {
                queue_commit(&self.queue, ComputePath::Sparse, position);
                (sparse, None)
            },
            GateDecision::DualCompare => {
                queue_forward(&self.queue, num_layers, token, position, ComputePath::Dense, true);
                let dense = self
                    .queue
                    .fence(|ws| Ok(ws.logits(ComputePath::Dense).to_vec()))
                    .wait()?;
                let diff = energy_difference(&sparse, &dense);
                queue_commit(&self.queue, ComputePath::Dense, position);
                (dense, Some(diff))
            },
        };
        self.gate.resolve(&mut self.state.stats, energy);
        debug!(position, entropy, ?decision, energy_difference = ?energy, "gated step");

        let next = sample_token(&logits, &self.sampling, &mut self.rng);
        self.state.history.push(next);
        self.state.position = position + 1;
        Ok(next)
    }

    /// Prefill `prompt` and generate up to `max_tokens` tokens
    ///
    /// Stops early on a stop token or at the context ceiling (with a warning).
    /// A session that already ran is reset first.
    ///
    /// # Errors
    ///
    /// As [`Session::prefill`] and [`Session::step`].
    pub fn generate(&mut self, prompt: &[u32], max_tokens: usize) -> Result<Vec<u32>> {
        if !self.state.history.is_empty() {
            self.reset()?;
        }
        self.prefill(prompt)?;

        let mut produced = Vec::with_capacity(max_tokens);
        while produced.len() < max_tokens {
            if self.state.history.len() >= self.ceiling {
                warn!(
                    ceiling = self.ceiling,
                    produced = produced.len(),
                    requested = max_tokens,
                    "context ceiling reached, truncating generation"
                );
                break;
            }
            let token = self.step()?;
            produced.push(token);
            if self.sampling.is_stop_token(token) {
                break;
            }
        }

        // Surface faults from trailing commits and prompt-only prefills
        self.queue.fence(|_| Ok(())).wait()?;
        Ok(produced)
    }
}
