//! Property tests for cache integrity, pruning, and gate monotonicity

use proptest::prelude::*;
use vargate::entropy::quick_entropy;
use vargate::gate::energy_difference;
use vargate::kv_cache::KvCache;
use vargate::ops::{DenseMatrix, MatVec};
use vargate::sparse::{prune, prune_matrix, CsrMatrix};
use vargate::{CacheError, GateDecision, VariationalGate};

fn matrix_and_input() -> impl Strategy<Value = (DenseMatrix, Vec<f32>)> {
    (1usize..12, 1usize..12).prop_flat_map(|(rows, cols)| {
        (
            prop::collection::vec(-4.0f32..4.0, rows * cols),
            prop::collection::vec(-2.0f32..2.0, cols),
        )
            .prop_map(move |(data, x)| (DenseMatrix::new(rows, cols, data).unwrap(), x))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Writes are accepted only in position order and below capacity
    #[test]
    fn prop_cache_accepts_only_next_position(
        capacity in 1usize..16,
        positions in prop::collection::vec(0usize..20, 1..40),
    ) {
        let mut cache = KvCache::new(1, 2, capacity);
        let row = [1.0f32, 2.0];
        for p in positions {
            let next = cache.layer_len(0);
            match cache.append(0, p, &row, &row) {
                Ok(()) => {
                    prop_assert_eq!(p, next);
                    prop_assert!(p < capacity);
                },
                Err(CacheError::OutOfOrder { expected, got, .. }) => {
                    prop_assert_eq!(expected, next);
                    prop_assert_eq!(got, p);
                    prop_assert_ne!(p, next);
                },
                Err(CacheError::ContextOverflow { position, capacity: cap }) => {
                    prop_assert_eq!(position, next);
                    prop_assert_eq!(cap, capacity);
                    prop_assert!(p >= capacity);
                },
                Err(other) => prop_assert!(false, "unexpected {other:?}"),
            }
            prop_assert!(cache.layer_len(0) <= capacity);
        }
    }

    /// Pruning zeroes exactly floor(ratio * n) entries, all no larger than any survivor
    #[test]
    fn prop_prune_removes_smallest(
        mut values in prop::collection::vec(-10.0f32..10.0, 1..200),
        ratio in 0.0f32..0.99,
    ) {
        let original = values.clone();
        let n = values.len();
        let pruned = prune(&mut values, ratio).unwrap();
        prop_assert_eq!(pruned, (f64::from(ratio) * n as f64).floor() as usize);

        let kept_min = values.iter().filter(|v| **v != 0.0).map(|v| v.abs()).fold(f32::INFINITY, f32::min);
        for (before, after) in original.iter().zip(&values) {
            if *after == 0.0 {
                prop_assert!(before.abs() <= kept_min);
            } else {
                prop_assert_eq!(before, after);
            }
        }
    }

    /// The CSR form computes the same products as the pruned dense form
    #[test]
    fn prop_csr_matches_pruned_dense(
        (m, x) in matrix_and_input(),
        ratio in 0.0f32..0.99,
    ) {
        let pruned = prune_matrix(&m, ratio).unwrap();
        let csr = CsrMatrix::compact(&pruned);
        prop_assert_eq!(csr.matvec(&x).unwrap(), pruned.matvec(&x).unwrap());
        prop_assert_eq!(csr.to_dense().matvec(&x).unwrap(), pruned.matvec(&x).unwrap());
    }

    /// Raising the threshold never turns a sparse-only step into a comparison
    #[test]
    fn prop_gate_monotone_in_threshold(
        logits in prop::collection::vec(-20.0f32..20.0, 2..300),
        low in 0.0f32..4.0,
        delta in 0.0f32..4.0,
    ) {
        let entropy = quick_entropy(&logits, 64);
        let at_low = VariationalGate::classify(low, entropy);
        let at_high = VariationalGate::classify(low + delta, entropy);
        if at_low == GateDecision::SparseOnly {
            prop_assert_eq!(at_high, GateDecision::SparseOnly);
        }
    }

    /// Energy difference is a bounded, symmetric distance
    #[test]
    fn prop_energy_difference_bounded(
        a in prop::collection::vec(-10.0f32..10.0, 8),
        b in prop::collection::vec(-10.0f32..10.0, 8),
    ) {
        let d = energy_difference(&a, &b);
        prop_assert!((0.0..=1.0).contains(&d));
        prop_assert!((d - energy_difference(&b, &a)).abs() < 1e-6);
        prop_assert!(energy_difference(&a, &a) < 1e-6);
    }
}
