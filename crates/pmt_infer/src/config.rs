//! Pipeline configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pmt_core::{PreprocessConfig, DEFAULT_IMAGE_SIZE, IMAGENET_MEAN, IMAGENET_STD};
use pmt_models::{BackboneKind, CheckpointMetadata};

use crate::error::{InferError, Result};

/// Environment variable overriding [`PipelineConfig::output_root`].
pub const OUTPUT_ROOT_ENV: &str = "OUTPUT_ROOT";

/// Subdirectory of the output root holding overlays.
pub const GRADCAM_DIR: &str = "gradcam";

/// Subdirectory of the output root holding checkpoints.
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Conventional checkpoint of the best `arch` model under `output_root`.
pub fn best_checkpoint(output_root: impl AsRef<Path>, arch: &str) -> PathBuf {
    output_root
        .as_ref()
        .join(CHECKPOINT_DIR)
        .join(format!("{arch}_best.mpk"))
}

/// A model to load: architecture plus checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Architecture name; when absent the checkpoint sidecar decides.
    #[serde(default)]
    pub arch: Option<String>,
    /// Checkpoint path.
    pub checkpoint: PathBuf,
}

impl ModelSpec {
    /// Create a spec with an explicit architecture.
    pub fn new(arch: impl Into<String>, checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            arch: Some(arch.into()),
            checkpoint: checkpoint.into(),
        }
    }

    /// Create a spec whose architecture comes from the checkpoint sidecar.
    pub fn from_checkpoint(checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            arch: None,
            checkpoint: checkpoint.into(),
        }
    }

    /// Resolve the backbone kind.
    ///
    /// # Errors
    ///
    /// [`InferError::Registry`] for an unknown name, and
    /// [`InferError::Configuration`] when no name is given and the checkpoint
    /// has no readable sidecar.
    pub fn resolve_kind(&self) -> Result<BackboneKind> {
        if let Some(arch) = &self.arch {
            return Ok(arch.parse()?);
        }
        let metadata = CheckpointMetadata::load_sidecar(&self.checkpoint)?.ok_or_else(|| {
            InferError::Configuration(format!(
                "no architecture given for {} and no checkpoint sidecar found",
                self.checkpoint.display()
            ))
        })?;
        Ok(metadata.arch.parse()?)
    }

    /// Move a conventional `<old_root>/checkpoints/<arch>_best.mpk` path under
    /// `new_root`. Any other checkpoint path is left alone.
    fn rebase(&mut self, old_root: &Path, new_root: &Path) {
        if let Some(arch) = &self.arch {
            if self.checkpoint == best_checkpoint(old_root, arch) {
                self.checkpoint = best_checkpoint(new_root, arch);
            }
        }
    }
}

/// Configuration of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side length models expect.
    pub image_size: u32,
    /// Per-channel normalisation mean.
    pub normalize_mean: [f32; 3],
    /// Per-channel normalisation standard deviation.
    pub normalize_std: [f32; 3],
    /// Root of all written artifacts.
    pub output_root: PathBuf,
    /// URL prefix under which overlays are served.
    pub url_prefix: String,
    /// Severity regressor.
    pub regressor: ModelSpec,
    /// Optional PMT gate.
    pub gate: Option<ModelSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let arch = BackboneKind::CustomCnn.name();
        let output_root = PathBuf::from("outputs");
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            normalize_mean: IMAGENET_MEAN,
            normalize_std: IMAGENET_STD,
            url_prefix: "outputs/gradcam".to_string(),
            regressor: ModelSpec::new(arch, best_checkpoint(&output_root, arch)),
            output_root,
            gate: None,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            InferError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            InferError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(OUTPUT_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.set_output_root(root);
        }
        self
    }

    /// Replace the output root. Checkpoints at their conventional place under
    /// the old root follow it to the new one.
    pub fn set_output_root(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        self.regressor.rebase(&self.output_root, &root);
        if let Some(gate) = &mut self.gate {
            gate.rebase(&self.output_root, &root);
        }
        self.output_root = root;
    }

    /// Directory overlays are written to.
    pub fn overlay_dir(&self) -> PathBuf {
        self.output_root.join(GRADCAM_DIR)
    }

    /// Preprocessing settings.
    pub fn preprocess(&self) -> PreprocessConfig {
        PreprocessConfig {
            image_size: self.image_size,
            mean: self.normalize_mean,
            std: self.normalize_std,
        }
    }

    /// Check everything that can be checked without touching model files.
    pub fn validate(&self) -> Result<()> {
        self.preprocess()
            .validate()
            .map_err(|e| InferError::Configuration(e.to_string()))?;
        if self.url_prefix.trim_matches('/').is_empty() {
            return Err(InferError::Configuration(
                "url_prefix must not be empty".to_string(),
            ));
        }
        if let Some(arch) = &self.regressor.arch {
            arch.parse::<BackboneKind>()?;
        }
        Ok(())
    }
}
