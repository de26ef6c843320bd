//! Error types for vargate
//!
//! Every failure surfaces to the caller as a typed variant. Nothing is retried
//! internally: the computations are deterministic, so repeating them with the
//! same inputs cannot change the outcome.

use thiserror::Error;

use crate::quantize::QuantKind;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, VargateError>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum VargateError {
    /// Malformed container: bad magic or version, unknown quantization kind,
    /// descriptor offset/length mismatch
    #[error("Format error: {reason}")]
    FormatError {
        /// Human-readable cause
        reason: String,
    },

    /// Block arithmetic inconsistency while dequantizing
    #[error("Decode error ({kind}): {reason}")]
    DecodeError {
        /// Quantization kind being decoded
        kind: QuantKind,
        /// Human-readable cause
        reason: String,
    },

    /// KV cache integrity violation; fatal to the current session
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Non-finite values detected during a forward pass
    #[error("Generation error at position {position}{}: {reason}", layer_suffix(.layer))]
    GenerationError {
        /// Layer where corruption was first observed (`None` = final logits)
        layer: Option<usize>,
        /// Sequence position being computed
        position: usize,
        /// Human-readable cause
        reason: String,
    },

    /// Prompt does not fit within the effective context ceiling
    #[error("Context limit exceeded: {requested} tokens requested, limit is {limit}")]
    ContextLimitExceeded {
        /// Tokens the request needs
        requested: usize,
        /// Effective ceiling
        limit: usize,
    },

    /// The compute worker stopped before completing submitted work
    #[error("Compute queue unavailable: {reason}")]
    ComputeUnavailable {
        /// Human-readable cause
        reason: String,
    },

    /// Invalid engine, sparsity or sampling configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Human-readable cause
        reason: String,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn layer_suffix(layer: &Option<usize>) -> String {
    match layer {
        Some(l) => format!(", layer {l}"),
        None => ", output head".to_string(),
    }
}

/// Error type for KV cache operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Position is not exactly one past the highest written position
    #[error("Out-of-order write to layer {layer}: expected position {expected}, got {got}")]
    OutOfOrder {
        /// Layer index
        layer: usize,
        /// Next position the layer accepts
        expected: usize,
        /// Position that was attempted
        got: usize,
    },

    /// Position is at or beyond capacity
    #[error("Context overflow: position {position} >= capacity {capacity}")]
    ContextOverflow {
        /// Position that was attempted
        position: usize,
        /// Cache capacity in positions
        capacity: usize,
    },

    /// Layer index outside the cache
    #[error("Layer {layer} out of range ({num_layers} layers)")]
    LayerOutOfRange {
        /// Layer index
        layer: usize,
        /// Number of layers in the cache
        num_layers: usize,
    },

    /// Key or value width disagrees with the cache row width
    #[error("K/V width mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Configured row width
        expected: usize,
        /// Supplied width
        got: usize,
    },

    /// Read of a position that has not been written
    #[error("Position {position} not yet written for layer {layer} ({len} positions cached)")]
    NotWritten {
        /// Layer index
        layer: usize,
        /// Requested position
        position: usize,
        /// Positions currently cached
        len: usize,
    },
}

impl VargateError {
    /// Shorthand for a [`VargateError::FormatError`]
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::FormatError {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`VargateError::InvalidConfiguration`]
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Whether the error ends the current session (the engine stays usable)
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cache(_)
                | Self::GenerationError { .. }
                | Self::ContextLimitExceeded { .. }
                | Self::ComputeUnavailable { .. }
        )
    }
}
