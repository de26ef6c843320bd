//! Benchmark suite for block dequantization
//!
//! Measures decode throughput per quantization kind at load-time tensor sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vargate::quantize::{dequantize, quantize, QuantKind};

fn weights(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 7919) % 1000) as f32 / 500.0 - 1.0).collect()
}

fn benchmark_dequantize_kinds(c: &mut Criterion) {
    let n = 256 * 1024;
    let values = weights(n);
    let mut group = c.benchmark_group("dequantize");
    group.throughput(Throughput::Elements(n as u64));

    for kind in [
        QuantKind::F16,
        QuantKind::Q4_0,
        QuantKind::Q8_0,
        QuantKind::Q4_K,
        QuantKind::Q6_K,
    ] {
        let packed = quantize(kind, &values).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{kind:?}")), &packed, |b, packed| {
            b.iter(|| black_box(dequantize(kind, black_box(packed), n).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_dequantize_kinds);
criterion_main!(benches);
