//! Per-image sequencing and batch aggregation.

use std::path::Path;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;

use pmt_core::{LoadedImage, PreparedImage, Preprocessor, SeverityDimension};
use pmt_explain::OverlayRenderer;
use pmt_models::{GATE_OUTPUTS, REGRESSOR_OUTPUTS};

use crate::artifacts::{overlay_file_name, ArtifactStore, DirectoryStore};
use crate::config::PipelineConfig;
use crate::error::{InferError, Result};
use crate::gate::Gate;
use crate::regressor::SeverityRegressor;
use crate::result::{BatchResult, ImageOutcome, ImageStage, InferenceRequest, PipelineWarning};
use crate::session::InferenceSession;

/// Runs gate, regressor, saliency and overlay rendering over a batch.
///
/// Each image moves through
/// `LOADED -> GATE_CHECKED -> (REJECTED | SEVERITY_SCORED) -> (SALIENCY_DONE | SALIENCY_SKIPPED) -> FINALIZED`,
/// with decode and scoring failures ending in `ERROR`. A failure is always
/// confined to the image that caused it.
pub struct InferenceOrchestrator {
    preprocessor: Preprocessor,
    gate: Gate,
    regressor: SeverityRegressor,
    renderer: OverlayRenderer,
    store: Arc<dyn ArtifactStore>,
    warnings: Vec<PipelineWarning>,
}

impl InferenceOrchestrator {
    /// Assemble a pipeline from already loaded parts.
    pub fn new(
        preprocessor: Preprocessor,
        gate: Gate,
        regressor: SeverityRegressor,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self::assemble(
            preprocessor,
            gate,
            regressor,
            store,
            "no gate model loaded".to_string(),
        )
    }

    fn assemble(
        preprocessor: Preprocessor,
        gate: Gate,
        regressor: SeverityRegressor,
        store: Arc<dyn ArtifactStore>,
        unavailable_reason: String,
    ) -> Self {
        let warnings = if gate.is_available() {
            Vec::new()
        } else {
            vec![PipelineWarning::GateUnavailable {
                reason: unavailable_reason,
            }]
        };
        Self {
            preprocessor,
            gate,
            regressor,
            renderer: OverlayRenderer::new(),
            store,
            warnings,
        }
    }

    /// Load every model named in `config`.
    ///
    /// # Errors
    ///
    /// Any problem with the regressor, the preprocessing settings or the
    /// overlay directory is a configuration error. A gate that cannot be
    /// loaded only degrades the pipeline.
    pub fn from_config<B: AutodiffBackend>(
        config: &PipelineConfig,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let preprocessor = Preprocessor::new(config.preprocess())
            .map_err(|e| InferError::Configuration(e.to_string()))?;

        let (regressor, _) =
            InferenceSession::<B>::from_spec(&config.regressor, REGRESSOR_OUTPUTS, device)?;
        let regressor = SeverityRegressor::new(Arc::new(regressor))?;

        let gate = match &config.gate {
            Some(spec) => InferenceSession::<B>::from_spec(spec, GATE_OUTPUTS, device)
                .and_then(|(session, _)| Gate::new(Arc::new(session))),
            None => Err(InferError::Configuration(
                "no gate model configured".to_string(),
            )),
        };
        let (gate, reason) = match gate {
            Ok(gate) => (gate, String::new()),
            Err(e) => {
                tracing::warn!(error = %e, "Gate unavailable, accepting every image");
                (Gate::unavailable(), e.to_string())
            }
        };

        let overlay_dir = config.overlay_dir();
        let store = DirectoryStore::create(&overlay_dir, &config.url_prefix).map_err(|e| {
            InferError::Configuration(format!(
                "cannot prepare overlay directory {}: {e}",
                overlay_dir.display()
            ))
        })?;

        Ok(Self::assemble(
            preprocessor,
            gate,
            regressor,
            Arc::new(store),
            reason,
        ))
    }

    /// Whether the gate is missing.
    pub fn is_degraded(&self) -> bool {
        !self.gate.is_available()
    }

    /// Process-wide warnings attached to every result.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Process every image of `request`, in order.
    pub fn run(&self, request: &InferenceRequest) -> BatchResult {
        let outcomes: Vec<ImageOutcome> = request
            .images
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let outcome = self.process_image(index, path);
                tracing::debug!(
                    index,
                    from = %outcome.stage(),
                    to = %ImageStage::Finalized,
                    "Image stage"
                );
                outcome
            })
            .collect();

        let result = BatchResult::new(outcomes, self.warnings.clone(), request.metadata.clone());
        tracing::info!(
            images = result.images.len(),
            scored = result.n_scored(),
            rejected = result.n_rejected(),
            errors = result.n_errors(),
            mean_overall = ?result.mean_overall,
            degraded = result.degraded,
            "Batch complete"
        );
        result
    }

    fn process_image(&self, index: usize, path: &Path) -> ImageOutcome {
        let error = |message: String| ImageOutcome::Error {
            path: path.to_path_buf(),
            message,
        };
        let stage = |from: ImageStage, to: ImageStage| {
            tracing::debug!(index, path = %path.display(), %from, %to, "Image stage");
        };

        let (loaded, prepared) = match self.preprocessor.load_and_prepare(path) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(index, path = %path.display(), error = %e, "Image failed to load");
                stage(ImageStage::Loaded, ImageStage::Error);
                return error(e.to_string());
            }
        };

        let decision = match self.gate.decide(&prepared) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(index, path = %path.display(), error = %e, "Gate failed");
                stage(ImageStage::Loaded, ImageStage::Error);
                return error(e.to_string());
            }
        };
        stage(ImageStage::Loaded, ImageStage::GateChecked);

        if !decision.is_accepted() {
            stage(ImageStage::GateChecked, ImageStage::Rejected);
            return ImageOutcome::Rejected {
                path: path.to_path_buf(),
            };
        }

        let prediction = match self.regressor.predict(&prepared) {
            Ok(prediction) => prediction,
            Err(e) => {
                tracing::warn!(index, path = %path.display(), error = %e, "Severity scoring failed");
                stage(ImageStage::GateChecked, ImageStage::Error);
                return error(e.to_string());
            }
        };
        stage(ImageStage::GateChecked, ImageStage::SeverityScored);

        let target = prediction.target();
        let (overlay, saliency_error) =
            match self.write_overlay(index, &loaded, &prepared, target) {
                Ok(url) => {
                    stage(ImageStage::SeverityScored, ImageStage::SaliencyDone);
                    (Some(url), None)
                }
                Err(e) => {
                    tracing::warn!(
                        index,
                        path = %path.display(),
                        error = %e,
                        "Saliency skipped"
                    );
                    stage(ImageStage::SeverityScored, ImageStage::SaliencySkipped);
                    (None, Some(e.to_string()))
                }
            };

        ImageOutcome::Scored {
            path: path.to_path_buf(),
            overall_sum: prediction.overall(),
            scores: *prediction.scores(),
            target_dimension: target,
            overlay,
            saliency_error,
        }
    }

    fn write_overlay(
        &self,
        index: usize,
        loaded: &LoadedImage,
        prepared: &PreparedImage,
        target: SeverityDimension,
    ) -> Result<String> {
        let map = self.regressor.explain(prepared, target)?;
        let overlay = self.renderer.render(&loaded.rgb, &map)?;
        let file_name = overlay_file_name(&loaded.path, index);
        self.store.save_overlay(&file_name, &overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;
    use pmt_core::{PreprocessConfig, NUM_DIMENSIONS};
    use pmt_explain::{ExplainError, SaliencyMap};
    use tempfile::TempDir;

    use crate::session::{ExplainableModel, ScoringModel};

    /// Rejects images darker than the normalisation mean.
    struct BrightnessGate;

    impl ScoringModel for BrightnessGate {
        fn n_outputs(&self) -> usize {
            2
        }

        fn forward(&self, image: &PreparedImage) -> Result<Vec<f32>> {
            if image.mean() < 0.0 {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    /// Returns queued outputs in call order and records explain targets.
    #[derive(Default)]
    struct ScriptedRegressor {
        outputs: Mutex<VecDeque<Vec<f32>>>,
        targets: Mutex<Vec<usize>>,
        fail_explain: bool,
    }

    impl ScriptedRegressor {
        fn new(outputs: Vec<Vec<f32>>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                ..Default::default()
            }
        }

        fn failing(outputs: Vec<Vec<f32>>) -> Self {
            Self {
                fail_explain: true,
                ..Self::new(outputs)
            }
        }
    }

    impl ScoringModel for ScriptedRegressor {
        fn n_outputs(&self) -> usize {
            NUM_DIMENSIONS
        }

        fn forward(&self, _image: &PreparedImage) -> Result<Vec<f32>> {
            Ok(self
                .outputs
                .lock()
                .pop_front()
                .unwrap_or_else(|| vec![1.0; NUM_DIMENSIONS]))
        }
    }

    impl ExplainableModel for ScriptedRegressor {
        fn explain(&self, _image: &PreparedImage, target: usize) -> Result<SaliencyMap> {
            self.targets.lock().push(target);
            if self.fail_explain {
                return Err(ExplainError::Instrumentation(
                    "tap received no gradient".to_string(),
                )
                .into());
            }
            Ok(SaliencyMap::from_raw(2, 2, vec![0.0, 0.5, 1.0, 0.25])?)
        }
    }

    fn uniform(value: f32) -> Vec<f32> {
        vec![value; NUM_DIMENSIONS]
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("gradcam")).unwrap();
            Self { dir }
        }

        fn image(&self, name: &str, value: u8) -> PathBuf {
            let path = self.dir.path().join(name);
            RgbImage::from_pixel(12, 9, Rgb([value, value, value]))
                .save(&path)
                .unwrap();
            path
        }

        fn corrupt(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"definitely not a jpeg").unwrap();
            path
        }

        fn overlay_dir(&self) -> PathBuf {
            self.dir.path().join("gradcam")
        }

        fn orchestrator(&self, gate: Gate, regressor: Arc<ScriptedRegressor>) -> InferenceOrchestrator {
            InferenceOrchestrator::new(
                Preprocessor::new(PreprocessConfig::new(8)).unwrap(),
                gate,
                SeverityRegressor::new(regressor).unwrap(),
                Arc::new(DirectoryStore::new(self.overlay_dir(), "outputs/gradcam")),
            )
        }
    }

    fn gate() -> Gate {
        Gate::new(Arc::new(BrightnessGate)).unwrap()
    }

    #[test]
    fn test_mixed_batch_keeps_order_and_length() {
        let fx = Fixture::new();
        let images = vec![
            fx.image("a.png", 200),
            fx.corrupt("b.jpg"),
            fx.image("c.png", 0),
            fx.dir.path().join("missing.jpg"),
            fx.image("e.png", 180),
        ];
        let regressor = Arc::new(ScriptedRegressor::new(vec![uniform(2.0), uniform(4.0)]));
        let orchestrator = fx.orchestrator(gate(), regressor);

        let result = orchestrator.run(&InferenceRequest::new(images.clone()));

        assert_eq!(result.images.len(), 5);
        assert_eq!(result.overlays.len(), 5);
        for (outcome, path) in result.images.iter().zip(&images) {
            assert_eq!(outcome.path(), path);
        }
        assert!(result.images[0].is_scored());
        assert!(result.images[1].is_error());
        assert!(result.images[2].is_rejected());
        assert!(result.images[3].is_error());
        assert!(result.images[4].is_scored());
        assert_eq!((result.n_scored(), result.n_rejected(), result.n_errors()), (2, 1, 2));
        assert!(!result.degraded);

        // Only scored images count towards the means
        assert_eq!(result.mean_overall, Some(39.0));
        assert_eq!(
            result.overlays,
            vec![
                Some("outputs/gradcam/gradcam_a.png".to_string()),
                None,
                None,
                None,
                Some("outputs/gradcam/gradcam_e.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_gate_unavailable_scores_everything() {
        let fx = Fixture::new();
        let images = vec![
            fx.image("a.png", 0),
            fx.image("b.png", 90),
            fx.image("c.png", 255),
        ];
        let orchestrator =
            fx.orchestrator(Gate::unavailable(), Arc::new(ScriptedRegressor::default()));
        assert!(orchestrator.is_degraded());

        let result = orchestrator.run(&InferenceRequest::new(images));

        assert_eq!(result.n_scored(), 3);
        assert!(result.degraded);
        assert!(matches!(
            result.warnings.as_slice(),
            [PipelineWarning::GateUnavailable { .. }]
        ));
    }

    #[test]
    fn test_saliency_targets_raw_argmax() {
        let fx = Fixture::new();
        let mut raw = vec![0.0; NUM_DIMENSIONS];
        raw[..3].copy_from_slice(&[1.0, 2.0, 6.0]);
        let regressor = Arc::new(ScriptedRegressor::new(vec![raw]));
        let orchestrator = fx.orchestrator(gate(), Arc::clone(&regressor));

        let result = orchestrator.run(&InferenceRequest::new([fx.image("a.png", 200)]));

        assert_eq!(*regressor.targets.lock(), vec![2]);
        match &result.images[0] {
            ImageOutcome::Scored {
                target_dimension, ..
            } => assert_eq!(*target_dimension, SeverityDimension::Rust),
            other => panic!("expected a scored image, got {other:?}"),
        }
    }

    #[test]
    fn test_mean_overall_over_accepted_images() {
        let fx = Fixture::new();
        let mut first = vec![1.0; NUM_DIMENSIONS];
        first[0] = 0.0; // 12
        let mut second = vec![1.0; NUM_DIMENSIONS];
        second[0] = 6.0; // 18
        let regressor = Arc::new(ScriptedRegressor::new(vec![first, second]));
        let orchestrator = fx.orchestrator(gate(), regressor);

        let result = orchestrator.run(&InferenceRequest::new([
            fx.image("a.png", 200),
            fx.image("b.png", 0),
            fx.image("c.png", 220),
        ]));

        let overall: Vec<f32> = result
            .images
            .iter()
            .filter_map(|o| o.scores().map(|s| s.overall()))
            .collect();
        assert_eq!(overall, vec![12.0, 18.0]);
        assert_eq!(result.mean_overall, Some(15.0));
    }

    #[test]
    fn test_scores_are_clamped() {
        let fx = Fixture::new();
        let mut raw = vec![1.0; NUM_DIMENSIONS];
        raw[0] = -5.0;
        raw[1] = 11.0;
        let orchestrator = fx.orchestrator(gate(), Arc::new(ScriptedRegressor::new(vec![raw])));

        let result = orchestrator.run(&InferenceRequest::new([fx.image("a.png", 200)]));

        match &result.images[0] {
            ImageOutcome::Scored {
                scores,
                overall_sum,
                target_dimension,
                ..
            } => {
                assert!(scores.values().iter().all(|v| (0.0..=6.0).contains(v)));
                assert_eq!(*overall_sum, scores.values().iter().sum::<f32>());
                assert_eq!(*overall_sum, 17.0);
                assert_eq!(*target_dimension, SeverityDimension::Corrosion);
            }
            other => panic!("expected a scored image, got {other:?}"),
        }
    }

    #[test]
    fn test_saliency_failure_keeps_scores() {
        let fx = Fixture::new();
        let regressor = Arc::new(ScriptedRegressor::failing(vec![uniform(3.0), uniform(5.0)]));
        let orchestrator = fx.orchestrator(gate(), Arc::clone(&regressor));

        let result = orchestrator.run(&InferenceRequest::new([
            fx.image("a.png", 200),
            fx.image("b.png", 210),
        ]));

        assert_eq!(result.n_scored(), 2);
        assert_eq!(regressor.targets.lock().len(), 2);
        assert!(result.overlays.iter().all(Option::is_none));
        assert_eq!(result.images[0].stage(), ImageStage::SaliencySkipped);
        match &result.images[1] {
            ImageOutcome::Scored {
                overall_sum,
                saliency_error,
                ..
            } => {
                assert_eq!(*overall_sum, 65.0);
                assert!(saliency_error.as_deref().unwrap().contains("no gradient"));
            }
            other => panic!("expected a scored image, got {other:?}"),
        }
    }

    #[test]
    fn test_overlay_written_at_original_size() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(gate(), Arc::new(ScriptedRegressor::default()));

        let result = orchestrator.run(&InferenceRequest::new([fx.image("tx_001.png", 200)]));

        assert_eq!(
            result.overlays[0].as_deref(),
            Some("outputs/gradcam/gradcam_tx_001.png")
        );
        let overlay = image::open(fx.overlay_dir().join("gradcam_tx_001.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(overlay.dimensions(), (12, 9));
    }

    #[test]
    fn test_overlay_write_failure_is_skipped() {
        let fx = Fixture::new();
        let orchestrator = InferenceOrchestrator::new(
            Preprocessor::new(PreprocessConfig::new(8)).unwrap(),
            gate(),
            SeverityRegressor::new(Arc::new(ScriptedRegressor::default())).unwrap(),
            Arc::new(DirectoryStore::new(fx.dir.path().join("absent"), "outputs/gradcam")),
        );

        let result = orchestrator.run(&InferenceRequest::new([fx.image("a.png", 200)]));

        assert!(result.images[0].is_scored());
        assert_eq!(result.overlays, vec![None]);
    }

    #[test]
    fn test_metadata_echoed() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(gate(), Arc::new(ScriptedRegressor::default()));
        let request = InferenceRequest::new(Vec::<PathBuf>::new())
            .with_metadata("transformer_id", "TX-9")
            .with_metadata("location", "Substation 4");

        let result = orchestrator.run(&request);

        assert!(result.images.is_empty());
        assert_eq!(result.mean_overall, None);
        assert_eq!(result.metadata, request.metadata);
    }

    #[test]
    fn test_shared_between_threads() {
        let fx = Fixture::new();
        let orchestrator = Arc::new(fx.orchestrator(gate(), Arc::new(ScriptedRegressor::default())));
        let images: Vec<PathBuf> = (0..4).map(|i| fx.image(&format!("{i}.png"), 200)).collect();

        let handles: Vec<_> = images
            .into_iter()
            .map(|path| {
                let orchestrator = Arc::clone(&orchestrator);
                std::thread::spawn(move || orchestrator.run(&InferenceRequest::new([path])))
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(result.n_scored(), 1);
            assert_eq!(result.mean_overall, Some(13.0));
        }
    }

    #[test]
    fn test_from_config_missing_regressor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            output_root: dir.path().to_path_buf(),
            regressor: crate::config::ModelSpec::new("custom_cnn", dir.path().join("none.mpk")),
            ..PipelineConfig::default()
        };
        let err = InferenceOrchestrator::from_config::<Autodiff<NdArray>>(
            &config,
            &Default::default(),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
    }
}
