//! End-to-end generation: determinism, gating, context limits

use vargate::model::factory::SyntheticModel;
use vargate::{Engine, EngineConfig, EngineLimits, SamplingConfig, SparsityConfig, VargateError};

fn engine(spec: &SyntheticModel, sparsity: SparsityConfig) -> Engine {
    let bytes = spec.build().unwrap();
    let config = EngineConfig {
        sparsity,
        ..EngineConfig::default()
    };
    Engine::from_bytes(&bytes, config).unwrap()
}

fn stochastic(seed: u64) -> SamplingConfig {
    SamplingConfig {
        temperature: 0.9,
        top_k: 12,
        top_p: 0.9,
        max_context: 128,
        seed,
        ..SamplingConfig::default()
    }
}

#[test]
fn test_same_seed_same_tokens() {
    let spec = SyntheticModel::tiny();
    let sparsity = SparsityConfig::uniform("blk.", 0.3);
    let mut a = engine(&spec, sparsity.clone());
    let mut b = engine(&spec, sparsity);

    let prompt = [4, 9, 16, 25];
    let first = a.generate(&prompt, 24, &stochastic(42)).unwrap();
    let second = b.generate(&prompt, 24, &stochastic(42)).unwrap();
    let again = a.generate(&prompt, 24, &stochastic(42)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, again);
    assert_eq!(a.stats(), b.stats());
}

#[test]
fn test_confident_model_stays_sparse() {
    let mut engine = engine(&SyntheticModel::peaked(), SparsityConfig::uniform("blk.", 0.5));
    let sampling = SamplingConfig {
        entropy_gate_threshold: 2.0,
        max_context: 128,
        ..SamplingConfig::default()
    };

    let out = engine.generate(&[3, 1, 4], 50, &sampling).unwrap();
    assert_eq!(out.len(), 50);
    let stats = engine.stats();
    assert_eq!(stats.steps_total, 50);
    assert!(stats.sparse_ratio() >= 0.6, "sparse ratio {}", stats.sparse_ratio());
}

#[test]
fn test_zero_threshold_always_compares() {
    let mut engine = engine(&SyntheticModel::tiny(), SparsityConfig::uniform("blk.", 0.5));
    let sampling = SamplingConfig::greedy(64).with_entropy_gate_threshold(0.0);

    engine.generate(&[1, 2, 3], 10, &sampling).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.dual_compare_steps, 10);
    assert_eq!(stats.sparse_only_steps, 0);
    assert!(stats.avg_energy_difference > 0.0);
    assert!(stats.avg_energy_difference <= 1.0);
}

#[test]
fn test_unpruned_paths_have_no_energy_difference() {
    let mut engine = engine(&SyntheticModel::tiny(), SparsityConfig::none());
    let sampling = SamplingConfig::greedy(64).with_entropy_gate_threshold(0.0);
    engine.generate(&[1, 2, 3], 5, &sampling).unwrap();
    assert_eq!(engine.stats().avg_energy_difference, 0.0);
}

#[test]
fn test_gating_does_not_change_unpruned_output() {
    let spec = SyntheticModel::tiny();
    let mut engine = engine(&spec, SparsityConfig::none());
    let never = SamplingConfig::greedy(64).with_entropy_gate_threshold(0.0);
    let always = SamplingConfig::greedy(64).with_entropy_gate_threshold(100.0);

    let compared = engine.generate(&[7, 8], 12, &never).unwrap();
    assert_eq!(engine.stats().dual_compare_steps, 12);
    let sparse = engine.generate(&[7, 8], 12, &always).unwrap();
    assert_eq!(engine.stats().sparse_only_steps, 12);
    assert_eq!(compared, sparse);
}

#[test]
fn test_prompt_over_ceiling_is_rejected() {
    let mut engine = engine(&SyntheticModel::tiny(), SparsityConfig::none());
    let prompt: Vec<u32> = (0..20).collect();
    assert!(matches!(
        engine.generate(&prompt, 5, &SamplingConfig::greedy(16)),
        Err(VargateError::ContextLimitExceeded { requested: 20, limit: 16 })
    ));
}

#[test]
fn test_engine_limits_cap_sampling_context() {
    let bytes = SyntheticModel::tiny().build().unwrap();
    let config = EngineConfig {
        limits: EngineLimits { max_context: 6 },
        ..EngineConfig::default()
    };
    let mut engine = Engine::from_bytes(&bytes, config).unwrap();
    let out = engine.generate(&[1, 2], 100, &SamplingConfig::greedy(100)).unwrap();
    assert_eq!(out.len(), 4);
}

#[test]
fn test_sessions_are_independent() {
    let engine = engine(&SyntheticModel::tiny(), SparsityConfig::none());
    let sampling = SamplingConfig::greedy(64);
    let mut a = engine.session(&sampling).unwrap();
    let mut b = engine.session(&sampling).unwrap();

    a.prefill(&[1, 2, 3]).unwrap();
    b.prefill(&[1, 2, 3]).unwrap();
    let from_a: Vec<u32> = (0..5).map(|_| a.step().unwrap()).collect();
    // Interleaving with another session leaves b's cache untouched
    let from_b: Vec<u32> = (0..5).map(|_| b.step().unwrap()).collect();
    assert_eq!(from_a, from_b);
    assert_eq!(a.state().position, 7);
    assert_eq!(b.stats().steps_total, 5);
}

#[test]
fn test_stats_readable_between_steps() {
    let engine = engine(&SyntheticModel::tiny(), SparsityConfig::none());
    let mut session = engine.session(&SamplingConfig::greedy(64)).unwrap();
    session.prefill(&[10]).unwrap();
    for expected in 1..=3 {
        session.step().unwrap();
        assert_eq!(session.stats().steps_total, expected);
    }
}
