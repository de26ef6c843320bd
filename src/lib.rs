//! # Vargate
//!
//! Quantized transformer inference with an entropy-gated compute path.
//!
//! Vargate loads a packed model container, decodes block-quantized weights to
//! `f32`, optionally prunes selected projections into CSR form, and generates
//! tokens with a per-step choice between the pruned ("sparse") and full
//! ("dense") weights. A cheap entropy estimate of the sparse logits decides
//! whether the step is confident enough to accept as is; otherwise the dense
//! path runs too and the divergence between the two is recorded.
//!
//! ## Example
//!
//! ```rust
//! use vargate::model::factory::SyntheticModel;
//! use vargate::{Engine, EngineConfig, SamplingConfig};
//!
//! let bytes = SyntheticModel::tiny().build().unwrap();
//! let mut engine = Engine::from_bytes(&bytes, EngineConfig::default()).unwrap();
//!
//! let tokens = engine.generate(&[1, 2, 3], 8, &SamplingConfig::greedy(64)).unwrap();
//! assert_eq!(tokens.len(), 8);
//!
//! let stats = engine.stats();
//! assert_eq!(stats.steps_total, 8);
//! assert_eq!(stats.sparse_only_steps + stats.dual_compare_steps, 8);
//! ```
//!
//! ## Architecture
//!
//! - **Load** (once): [`container`] → [`quantize`] → [`model`], with
//!   [`sparse`] pruning applied per [`SparsityConfig`]
//! - **Step** (per token): [`pipeline`] kernels on a [`compute`] queue,
//!   [`entropy`] estimate, [`gate`] decision, [`kv_cache`] commit, [`sampler`]

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 for ratios and indices
#![allow(clippy::cast_possible_truncation)] // u64 -> usize after bounds checks
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)] // Exact comparisons in tests

pub mod compute;
pub mod container;
pub mod engine;
pub mod entropy;
pub mod error;
pub mod gate;
pub mod kv_cache;
pub mod model;
pub mod ops;
pub mod pipeline;
pub mod quantize;
pub mod sampler;
pub mod sparse;
pub mod stats;
pub mod tensor;

pub use engine::{Engine, EngineConfig, EngineLimits, GenerationState, Session};
pub use error::{CacheError, Result, VargateError};
pub use gate::{GateDecision, GateState, VariationalGate};
pub use model::{ComputePath, Model, ModelConfig, Vocabulary};
pub use quantize::QuantKind;
pub use sampler::SamplingConfig;
pub use sparse::{CsrMatrix, SparsityConfig};
pub use stats::GenerationStats;
pub use tensor::Tensor;
