//! Variational gate: per-step choice between the sparse and dual paths
//!
//! ```text
//!          entropy < threshold
//!   Idle ──────────────────────▶ SparseOnly ──┐
//!     │                                       ├──▶ Resolved ──▶ Idle
//!     └──────────────────────▶ DualCompare ───┘
//!          otherwise
//! ```
//!
//! A confident step (low entropy) accepts the sparse result and never runs
//! the dense path. An uncertain step always runs both paths, emits the dense
//! logits and records how far the two distributions were apart.

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, VargateError};
use crate::ops::softmax;
use crate::stats::GenerationStats;

/// Default entropy threshold (nats)
pub const DEFAULT_ENTROPY_THRESHOLD: f32 = 1.0;

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    /// Waiting for the next step's entropy
    Idle,
    /// Sparse result accepted directly
    SparseOnly,
    /// Both paths run and compared
    DualCompare,
    /// Counters updated; returns to `Idle` on the next decision
    Resolved,
}

/// Outcome of a gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateDecision {
    /// Accept the sparse-path logits
    SparseOnly,
    /// Also run the dense path and emit its logits
    DualCompare,
}

/// Variational gate state machine
#[derive(Debug, Clone)]
pub struct VariationalGate {
    threshold: f32,
    state: GateState,
}

impl VariationalGate {
    /// Create a gate
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] for a negative or
    /// non-finite threshold.
    pub fn new(threshold: f32) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(VargateError::config(format!(
                "entropy gate threshold must be finite and non-negative, got {threshold}"
            )));
        }
        Ok(Self {
            threshold,
            state: GateState::Idle,
        })
    }

    /// Configured threshold
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Back to `Idle`, dropping any unresolved step
    pub fn reset(&mut self) {
        self.state = GateState::Idle;
    }

    /// Pure decision rule: sparse-only iff `entropy < threshold`
    ///
    /// A NaN entropy is never confident.
    #[must_use]
    pub fn classify(threshold: f32, entropy: f32) -> GateDecision {
        if entropy < threshold {
            GateDecision::SparseOnly
        } else {
            GateDecision::DualCompare
        }
    }

    /// Evaluate one step: `Idle → SparseOnly | DualCompare`
    pub fn decide(&mut self, entropy: f32) -> GateDecision {
        if self.state == GateState::Resolved {
            self.state = GateState::Idle;
        }
        if self.state != GateState::Idle {
            debug!(state = ?self.state, "gate re-entered before resolving; previous step discarded");
        }
        let decision = Self::classify(self.threshold, entropy);
        self.state = match decision {
            GateDecision::SparseOnly => GateState::SparseOnly,
            GateDecision::DualCompare => GateState::DualCompare,
        };
        decision
    }

    /// Close the step: update counters and move to `Resolved`
    ///
    /// The next [`VariationalGate::decide`] starts from `Idle` again.
    ///
    /// `energy_difference` is recorded only for dual-compare steps.
    pub fn resolve(&mut self, stats: &mut GenerationStats, energy_difference: Option<f32>) {
        match (self.state, energy_difference) {
            (GateState::SparseOnly, _) => stats.record_sparse_only(),
            (GateState::DualCompare, Some(e)) => stats.record_dual_compare(e),
            (GateState::DualCompare, None) => stats.record_dual_compare(0.0),
            (GateState::Idle | GateState::Resolved, _) => return,
        }
        self.state = GateState::Resolved;
    }
}

/// Distance between the softmax distributions of two logit vectors
///
/// L2 distance of the probability vectors divided by √2, so the result lies
/// in `[0, 1]`: 0 for identical distributions, 1 for disjoint one-hot ones.
#[must_use]
pub fn energy_difference(a: &[f32], b: &[f32]) -> f32 {
    let mut pa = a.to_vec();
    let mut pb = b.to_vec();
    softmax(&mut pa);
    softmax(&mut pb);
    let sq: f32 = pa.iter().zip(&pb).map(|(x, y)| (x - y) * (x - y)).sum();
    (sq.sqrt() / std::f32::consts::SQRT_2).min(1.0)
}
