//! Per-session generation counters

use serde::Serialize;

/// Counters describing how the variational gate resolved each step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    /// Gated generation steps taken
    pub steps_total: u64,
    /// Steps resolved on the sparse path alone
    pub sparse_only_steps: u64,
    /// Steps that ran both paths
    pub dual_compare_steps: u64,
    /// Mean energy difference over dual-compare steps (0 when there were none)
    pub avg_energy_difference: f32,
}

impl GenerationStats {
    /// Record a step resolved sparse-only
    pub fn record_sparse_only(&mut self) {
        self.steps_total += 1;
        self.sparse_only_steps += 1;
    }

    /// Record a dual-compare step and fold its energy difference into the mean
    pub fn record_dual_compare(&mut self, energy_difference: f32) {
        self.steps_total += 1;
        self.dual_compare_steps += 1;
        let n = self.dual_compare_steps as f32;
        self.avg_energy_difference += (energy_difference - self.avg_energy_difference) / n;
    }

    /// Fraction of steps resolved sparse-only (0 before the first step)
    #[must_use]
    pub fn sparse_ratio(&self) -> f32 {
        if self.steps_total == 0 {
            0.0
        } else {
            self.sparse_only_steps as f32 / self.steps_total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_running_mean() {
        let mut stats = GenerationStats::default();
        assert_eq!(stats.sparse_ratio(), 0.0);

        stats.record_sparse_only();
        stats.record_dual_compare(0.2);
        stats.record_dual_compare(0.4);
        stats.record_sparse_only();

        assert_eq!(stats.steps_total, 4);
        assert_eq!(stats.sparse_only_steps, 2);
        assert_eq!(stats.dual_compare_steps, 2);
        assert!((stats.avg_energy_difference - 0.3).abs() < 1e-6);
        assert_eq!(stats.sparse_ratio(), 0.5);
    }

    #[test]
    fn test_serializes_field_names() {
        let json = serde_json::to_value(GenerationStats::default()).unwrap();
        for key in ["steps_total", "sparse_only_steps", "dual_compare_steps", "avg_energy_difference"] {
            assert!(json.get(key).is_some(), "{key}");
        }
    }
}
