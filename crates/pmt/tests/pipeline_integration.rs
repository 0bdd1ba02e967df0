//! Integration tests for the inference pipeline.
//!
//! These tests write freshly initialised checkpoints to a temporary directory,
//! load them through the configuration path and run real images end to end.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use pmt::prelude::*;
use pmt_infer::PipelineWarning;
use pmt_models::metadata_path;

type InferBackend = Autodiff<NdArray>;

const IMAGE_SIZE: u32 = 32;

fn write_regressor(dir: &Path) -> PathBuf {
    let device = Default::default();
    let net = NetworkConfig::regressor(BackboneKind::CustomCnn)
        .init::<NdArray>(&device)
        .unwrap();
    let path =
        save_training_checkpoint(&net, Some(12), Some(0.41), dir.join("custom_cnn_best")).unwrap();
    CheckpointMetadata::new("custom_cnn", NUM_DIMENSIONS)
        .with_epoch(12)
        .with_best_metric(0.41)
        .save(metadata_path(&path))
        .unwrap();
    path
}

fn write_gate(dir: &Path, sidecar_arch: &str) -> PathBuf {
    let device = Default::default();
    let net = NetworkConfig::gate(BackboneKind::CustomCnn)
        .init::<NdArray>(&device)
        .unwrap();
    let path = save_network(&net, dir.join("gate_best")).unwrap();
    CheckpointMetadata::new(sidecar_arch, 2)
        .save(metadata_path(&path))
        .unwrap();
    path
}

fn write_photo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(40, 30, |x, y| {
        Rgb([(x * 6) as u8, (y * 8) as u8, ((x + y) * 3) as u8])
    })
    .save(&path)
    .unwrap();
    path
}

fn config(root: &Path, regressor: PathBuf, gate: Option<PathBuf>) -> PipelineConfig {
    PipelineConfig {
        image_size: IMAGE_SIZE,
        output_root: root.to_path_buf(),
        regressor: ModelSpec::from_checkpoint(regressor),
        gate: gate.map(ModelSpec::from_checkpoint),
        ..PipelineConfig::default()
    }
}

#[test]
fn test_pipeline_with_gate() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);
    let gate = write_gate(root, "custom_cnn");
    let photos = vec![
        write_photo(root, "tx_001.png"),
        write_photo(root, "tx_002.jpg"),
    ];

    let device = Default::default();
    let pipeline = InferenceOrchestrator::from_config::<InferBackend>(
        &config(root, regressor, Some(gate)),
        &device,
    )
    .unwrap();
    assert!(!pipeline.is_degraded());

    let request = InferenceRequest::new(photos.clone()).with_metadata("transformer_id", "TX-104");
    let result = pipeline.run(&request);

    assert_eq!(result.images.len(), 2);
    assert_eq!(result.overlays.len(), 2);
    assert!(!result.degraded);
    assert_eq!(result.n_errors(), 0);
    assert_eq!(result.n_scored() + result.n_rejected(), 2);
    assert_eq!(result.metadata["transformer_id"], "TX-104");

    for (outcome, photo) in result.images.iter().zip(&photos) {
        assert_eq!(outcome.path(), photo);
        if let Some(scores) = outcome.scores() {
            assert!(scores.values().iter().all(|v| (0.0..=6.0).contains(v)));
        }
    }
}

#[test]
fn test_pipeline_without_gate_is_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);
    let photos = vec![
        write_photo(root, "a.png"),
        write_photo(root, "b.png"),
        write_photo(root, "c.jpg"),
    ];

    let device = Default::default();
    let pipeline =
        InferenceOrchestrator::from_config::<InferBackend>(&config(root, regressor, None), &device)
            .unwrap();
    assert!(pipeline.is_degraded());

    let result = pipeline.run(&InferenceRequest::new(photos));

    assert!(result.degraded);
    assert_eq!(result.n_scored(), 3);

    let overall: Vec<f32> = result
        .images
        .iter()
        .filter_map(|o| o.scores().map(|s| s.overall()))
        .collect();
    let expected = overall.iter().sum::<f32>() / 3.0;
    assert!((result.mean_overall.unwrap() - expected).abs() < 1e-4);

    // Overlays land under <output_root>/gradcam and keep the input size
    for (outcome, name) in result.images.iter().zip(["a.png", "b.png", "c.jpg"]) {
        if let ImageOutcome::Scored {
            overlay,
            saliency_error,
            ..
        } = outcome
        {
            assert_eq!(saliency_error, &None);
            let file_name = format!("gradcam_{name}");
            assert_eq!(
                overlay.as_deref(),
                Some(format!("outputs/gradcam/{file_name}").as_str())
            );
            let written = image::open(root.join("gradcam").join(&file_name))
                .unwrap()
                .to_rgb8();
            assert_eq!(written.dimensions(), (40, 30));
        }
    }
}

#[test]
fn test_corrupt_image_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);
    let broken = root.join("broken.jpg");
    std::fs::write(&broken, b"\xff\xd8 truncated").unwrap();
    let photos = vec![write_photo(root, "a.png"), broken, write_photo(root, "c.png")];

    let device = Default::default();
    let pipeline =
        InferenceOrchestrator::from_config::<InferBackend>(&config(root, regressor, None), &device)
            .unwrap();
    let result = pipeline.run(&InferenceRequest::new(photos));

    assert_eq!(result.images.len(), 3);
    assert!(result.images[0].is_scored());
    assert!(result.images[1].is_error());
    assert!(result.images[2].is_scored());
    assert_eq!(result.overlays[1], None);
}

#[test]
fn test_gate_for_wrong_family_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);
    let gate = write_gate(root, "resnet18");

    let device = Default::default();
    let pipeline = InferenceOrchestrator::from_config::<InferBackend>(
        &config(root, regressor, Some(gate)),
        &device,
    )
    .unwrap();

    assert!(pipeline.is_degraded());
    assert!(matches!(
        pipeline.warnings(),
        [PipelineWarning::GateUnavailable { reason }] if reason.contains("Checkpoint")
    ));
}

#[test]
fn test_regressor_checkpoint_as_gate_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);

    let device = Default::default();
    let pipeline = InferenceOrchestrator::from_config::<InferBackend>(
        &config(root, regressor.clone(), Some(regressor)),
        &device,
    )
    .unwrap();

    assert!(pipeline.is_degraded());
    assert!(matches!(
        pipeline.warnings(),
        [PipelineWarning::GateUnavailable { reason }] if reason.contains("13 outputs")
    ));

    let result = pipeline.run(&InferenceRequest::new([write_photo(root, "tx.png")]));
    assert_eq!(result.n_scored(), 1);
}

#[test]
fn test_gate_checkpoint_as_regressor_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let gate = write_gate(root, "custom_cnn");

    let device = Default::default();
    let err = InferenceOrchestrator::from_config::<InferBackend>(&config(root, gate, None), &device)
        .err()
        .unwrap();
    assert!(err.is_configuration());
}

#[test]
fn test_missing_regressor_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = PipelineConfig {
        output_root: root.to_path_buf(),
        regressor: ModelSpec::new("custom_cnn", root.join("absent.mpk")),
        ..PipelineConfig::default()
    };

    let device = Default::default();
    let err = InferenceOrchestrator::from_config::<InferBackend>(&config, &device)
        .err()
        .unwrap();
    assert!(err.is_configuration());
}

#[test]
fn test_result_json() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let regressor = write_regressor(root);
    let photo = write_photo(root, "tx.png");

    let device = Default::default();
    let pipeline =
        InferenceOrchestrator::from_config::<InferBackend>(&config(root, regressor, None), &device)
            .unwrap();
    let result = pipeline.run(&InferenceRequest::new([photo]));

    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["images"][0]["status"], "scored");
    assert_eq!(
        json["images"][0]["scores"].as_object().unwrap().len(),
        NUM_DIMENSIONS
    );
    assert_eq!(json["degraded"], true);
    assert_eq!(json["warnings"][0]["kind"], "gate_unavailable");
}
