//! Benchmark suite for gated generation
//!
//! Compares per-step latency when every step is accepted sparse-only against
//! every step running both paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vargate::model::factory::SyntheticModel;
use vargate::{Engine, EngineConfig, SamplingConfig, SparsityConfig};

fn create_engine() -> Engine {
    let spec = SyntheticModel {
        hidden_dim: 256,
        intermediate_dim: 512,
        num_heads: 8,
        num_kv_heads: 4,
        vocab_size: 512,
        context_length: 256,
        ..SyntheticModel::tiny()
    };
    let bytes = spec.build().unwrap();
    let config = EngineConfig {
        sparsity: SparsityConfig::uniform("blk.", 0.7),
        ..EngineConfig::default()
    };
    Engine::from_bytes(&bytes, config).unwrap()
}

fn benchmark_generation(c: &mut Criterion) {
    let mut engine = create_engine();
    let prompt = [1, 5, 10, 20];

    let sparse_only = SamplingConfig::greedy(256).with_entropy_gate_threshold(1000.0);
    c.bench_function("generate_16_sparse_only", |b| {
        b.iter(|| black_box(engine.generate(black_box(&prompt), 16, &sparse_only).unwrap()));
    });

    let dual = SamplingConfig::greedy(256).with_entropy_gate_threshold(0.0);
    c.bench_function("generate_16_dual_compare", |b| {
        b.iter(|| black_box(engine.generate(black_box(&prompt), 16, &dual).unwrap()));
    });
}

criterion_group!(benches, benchmark_generation);
criterion_main!(benches);
