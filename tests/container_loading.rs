//! Loading model containers from disk and rejecting malformed ones

use vargate::container::{Container, ContainerBuilder, CONTAINER_MAGIC};
use vargate::model::factory::SyntheticModel;
use vargate::quantize::{dequantize, quantize_q4_0, QuantKind};
use vargate::{Engine, EngineConfig, SamplingConfig, SparsityConfig, VargateError};

fn write_temp(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.vgte");
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}

/// Overwrite the first embedding value with NaN
fn poison_embedding(bytes: &mut [u8]) {
    let container = Container::from_bytes(bytes).unwrap();
    let desc = container.tensor("token_embd.weight").unwrap();
    let at = container.data_base + desc.offset as usize;
    bytes[at..at + 4].copy_from_slice(&f32::NAN.to_le_bytes());
}

#[test]
fn test_load_from_file() {
    let spec = SyntheticModel::tiny();
    let (_dir, path) = write_temp(&spec.build().unwrap());

    let engine = Engine::load(&path, EngineConfig::default()).unwrap();
    let model = engine.model();
    assert_eq!(model.config.num_layers, 2);
    assert_eq!(model.config.hidden_dim, 32);
    assert_eq!(model.config.vocab_size, 48);
    assert_eq!(model.vocab.token(5), Some("t5"));
    assert!(model.sparsity.tensors.is_empty());
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Engine::load(dir.path().join("absent.vgte"), EngineConfig::default());
    assert!(matches!(result, Err(VargateError::Io(_))));
}

#[test]
fn test_load_quantized_weights() {
    for kind in [QuantKind::Q8_0, QuantKind::Q4_0, QuantKind::Q4_K, QuantKind::Q6_K] {
        let spec = SyntheticModel {
            weight_kind: kind,
            hidden_dim: 256,
            intermediate_dim: 256,
            num_heads: 4,
            num_kv_heads: 4,
            ..SyntheticModel::tiny()
        };
        let (_dir, path) = write_temp(&spec.build().unwrap());
        let mut engine = Engine::load(&path, EngineConfig::default()).unwrap();
        let out = engine.generate(&[1, 2], 3, &SamplingConfig::greedy(32)).unwrap();
        assert_eq!(out.len(), 3, "{kind:?}");
    }
}

#[test]
fn test_bad_magic_is_format_error() {
    let mut bytes = SyntheticModel::tiny().build().unwrap();
    assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), CONTAINER_MAGIC);
    bytes[..4].copy_from_slice(b"GGUF");
    let (_dir, path) = write_temp(&bytes);
    assert!(matches!(
        Engine::load(&path, EngineConfig::default()),
        Err(VargateError::FormatError { .. })
    ));
}

#[test]
fn test_truncated_file_is_format_error() {
    let bytes = SyntheticModel::tiny().build().unwrap();
    let (_dir, path) = write_temp(&bytes[..bytes.len() - 10]);
    assert!(matches!(
        Engine::load(&path, EngineConfig::default()),
        Err(VargateError::FormatError { .. })
    ));
}

#[test]
fn test_q4_0_block_arithmetic() {
    let values: Vec<f32> = (0..256).map(|i| (i as f32 - 128.0) / 64.0).collect();
    let packed = quantize_q4_0(&values).unwrap();
    assert_eq!(packed.len(), 144);

    let decoded = dequantize(QuantKind::Q4_0, &packed, 256).unwrap();
    assert_eq!(decoded.len(), 256);
    for (a, b) in values.iter().zip(&decoded) {
        assert!((a - b).abs() < 0.15, "{a} vs {b}");
    }

    for len in [143, 145] {
        let mut bytes = packed.clone();
        bytes.resize(len, 0);
        assert!(matches!(
            dequantize(QuantKind::Q4_0, &bytes, 256),
            Err(VargateError::DecodeError { kind: QuantKind::Q4_0, .. })
        ));
    }
}

#[test]
fn test_declared_length_mismatch_is_format_error() {
    let bytes = ContainerBuilder::new()
        .add_raw_tensor("w", &[256], QuantKind::Q4_0, vec![0; 143])
        .build();
    assert!(matches!(
        Container::from_bytes(&bytes),
        Err(VargateError::FormatError { .. })
    ));
}

#[test]
fn test_sanity_check_rejects_non_finite_embedding() {
    let mut bytes = SyntheticModel::tiny().build().unwrap();
    poison_embedding(&mut bytes);
    match Engine::from_bytes(&bytes, EngineConfig::default()) {
        Err(VargateError::FormatError { reason }) => assert!(reason.contains("misaligned"), "{reason}"),
        other => panic!("expected FormatError, got {other:?}"),
    }
}

#[test]
fn test_non_finite_activations_surface_with_layer() {
    let mut bytes = SyntheticModel::tiny().build().unwrap();
    poison_embedding(&mut bytes);
    let config = EngineConfig {
        sanity_check: false,
        ..EngineConfig::default()
    };
    let mut engine = Engine::from_bytes(&bytes, config).unwrap();

    // Token 1 is clean
    assert!(engine.generate(&[1], 1, &SamplingConfig::greedy(16)).is_ok());
    match engine.generate(&[0], 1, &SamplingConfig::greedy(16)) {
        Err(VargateError::GenerationError { layer, position, .. }) => {
            assert_eq!(layer, Some(0));
            assert_eq!(position, 0);
        },
        other => panic!("expected GenerationError, got {other:?}"),
    }
}

#[test]
fn test_sparsity_applied_at_load() {
    let bytes = SyntheticModel::tiny().build().unwrap();
    let config = EngineConfig {
        sparsity: SparsityConfig::uniform("blk.", 0.5),
        ..EngineConfig::default()
    };
    let engine = Engine::from_bytes(&bytes, config).unwrap();
    let summary = &engine.model().sparsity;
    // 7 projections per layer, norms are skipped
    assert_eq!(summary.tensors.len(), 14);
    assert!((summary.achieved() - 0.5).abs() < 0.01, "{}", summary.achieved());

    let layer = &engine.model().layers[0];
    assert!(layer.attn_q.sparse().is_some());
    assert!(engine.model().output.sparse().is_none());
}

#[test]
fn test_invalid_sparsity_ratio_rejected() {
    let bytes = SyntheticModel::tiny().build().unwrap();
    let config = EngineConfig {
        sparsity: SparsityConfig::uniform("blk.", 1.0),
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::from_bytes(&bytes, config),
        Err(VargateError::InvalidConfiguration { .. })
    ));
}
