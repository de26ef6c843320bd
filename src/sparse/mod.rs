//! Load-time sparse surgery
//!
//! A [`SparsityConfig`] names which weight tensors to prune and how hard.
//! At load time each matched matrix is pruned by magnitude and compacted into
//! a [`CsrMatrix`]; the sparse compute path then touches only stored entries.
//! None of this runs per token.

mod csr;
mod prune;

pub use csr::CsrMatrix;
pub use prune::{prune, prune_matrix};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VargateError};

/// How elements are chosen for removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Zero the lowest-magnitude elements; ties go to the lower row-major index
    #[default]
    Magnitude,
}

/// One pruning target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsityTarget {
    /// Exact tensor name, or a prefix followed by `*` (e.g. `blk.*`)
    pub pattern: String,
    /// Fraction of elements to zero, in `[0, 1)`
    pub ratio: f32,
}

impl SparsityTarget {
    /// Create a target
    #[must_use]
    pub fn new(pattern: impl Into<String>, ratio: f32) -> Self {
        Self {
            pattern: pattern.into(),
            ratio,
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == self.pattern,
        }
    }
}

/// Per-tensor sparsity targets, consumed once at load time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparsityConfig {
    /// Targets in priority order; the first matching pattern wins
    pub targets: Vec<SparsityTarget>,
    /// Selection rule shared by all targets
    pub rule: SelectionRule,
}

impl SparsityConfig {
    /// No pruning: the sparse path reuses the dense weights
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Prune every tensor whose name starts with `prefix` by `ratio`
    #[must_use]
    pub fn uniform(prefix: &str, ratio: f32) -> Self {
        Self {
            targets: vec![SparsityTarget::new(format!("{prefix}*"), ratio)],
            rule: SelectionRule::Magnitude,
        }
    }

    /// Add a target after the existing ones
    #[must_use]
    pub fn with_target(mut self, pattern: impl Into<String>, ratio: f32) -> Self {
        self.targets.push(SparsityTarget::new(pattern, ratio));
        self
    }

    /// Ratio for a tensor name, if any target matches
    #[must_use]
    pub fn ratio_for(&self, name: &str) -> Option<f32> {
        self.targets.iter().find(|t| t.matches(name)).map(|t| t.ratio)
    }

    /// Whether any target is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Validate ratios and patterns
    ///
    /// # Errors
    ///
    /// Returns [`VargateError::InvalidConfiguration`] for a ratio outside
    /// `[0, 1)`, an empty pattern, or a `*` anywhere but the end.
    pub fn validate(&self) -> Result<()> {
        for target in &self.targets {
            if !(0.0..1.0).contains(&target.ratio) {
                return Err(VargateError::config(format!(
                    "sparsity ratio {} for '{}' must be in [0, 1)",
                    target.ratio, target.pattern
                )));
            }
            if target.pattern.is_empty() {
                return Err(VargateError::config("sparsity pattern must not be empty"));
            }
            if target.pattern.trim_end_matches('*').contains('*') || target.pattern.ends_with("**") {
                return Err(VargateError::config(format!(
                    "sparsity pattern '{}' may only end with a single '*'",
                    target.pattern
                )));
            }
        }
        Ok(())
    }
}
