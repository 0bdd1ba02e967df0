//! Network checkpointing.
//!
//! Weights are stored with Burn's named MessagePack recorder at full
//! precision. Two layouts are accepted on load:
//!
//! - **Wrapped**: a training checkpoint `{model_state, epoch, best_metric}`.
//!   Any further fields (optimizer state and the like) are ignored.
//! - **Bare**: the network record on its own.
//!
//! The wrapped layout is tried first. An optional JSON sidecar next to the
//! weights ([`CheckpointMetadata`]) records the architecture and training
//! provenance.
//!
//! # Example
//!
//! ```rust,ignore
//! use pmt_models::{load_network, save_network, BackboneKind, NetworkConfig};
//!
//! let config = NetworkConfig::regressor(BackboneKind::ResNet18);
//! let net = config.init::<NdArray>(&device)?;
//! let written = save_network(&net, "regressor")?; // regressor.mpk
//!
//! let (loaded, info) = load_network::<NdArray>(&config, &written, &device)?;
//! assert_eq!(info.layout, CheckpointLayout::Bare);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use serde::{Deserialize, Serialize};

use crate::network::{InspectionNet, InspectionNetRecord, NetworkConfig};
use crate::record_shape::{record_outputs, RecordShape};
use crate::registry::{BackboneFamily, RegistryError};
use crate::traits::FeatureTap;

/// Extension the recorder writes.
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// Record type of an [`InspectionNet`].
pub type NetworkRecord<B> = <InspectionNet<B> as Module<B>>::Record;

/// A training checkpoint wrapping the network record.
#[derive(Record)]
pub struct TrainingCheckpoint<B: Backend> {
    /// Network weights.
    pub model_state: NetworkRecord<B>,
    /// Epoch the checkpoint was taken at.
    pub epoch: Option<usize>,
    /// Best validation metric seen so far.
    pub best_metric: Option<f64>,
}

/// Which layout a checkpoint was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointLayout {
    /// `{model_state, ...}` training checkpoint.
    Wrapped,
    /// Bare network record.
    Bare,
}

/// Provenance surfaced by [`load_network`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// File the weights were read from.
    pub path: PathBuf,
    /// Layout found on disk.
    pub layout: CheckpointLayout,
    /// Epoch, for wrapped checkpoints that recorded one.
    pub epoch: Option<usize>,
    /// Best metric, for wrapped checkpoints that recorded one.
    pub best_metric: Option<f64>,
}

/// Checkpoint sidecar metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Architecture name (e.g. `resnet18`).
    pub arch: String,
    /// Width of the output layer.
    pub n_outputs: usize,
    /// Training epoch (if applicable).
    #[serde(default)]
    pub epoch: Option<usize>,
    /// Best validation metric (if applicable).
    #[serde(default)]
    pub best_metric: Option<f64>,
    /// Additional metadata.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl CheckpointMetadata {
    /// Create new metadata for a network.
    pub fn new(arch: impl Into<String>, n_outputs: usize) -> Self {
        Self {
            arch: arch.into(),
            n_outputs,
            epoch: None,
            best_metric: None,
            extra: HashMap::new(),
        }
    }

    /// Set the training epoch.
    #[must_use]
    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Set the best validation metric.
    #[must_use]
    pub fn with_best_metric(mut self, metric: f64) -> Self {
        self.best_metric = Some(metric);
        self
    }

    /// Add extra metadata.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Save(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CheckpointError::Save(e.to_string()))?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Load(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| CheckpointError::Load(e.to_string()))
    }

    /// Load the sidecar of `checkpoint` if there is one.
    pub fn load_sidecar(checkpoint: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = metadata_path(checkpoint);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// No weights file at the given path.
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Error saving checkpoint.
    #[error("Failed to save checkpoint: {0}")]
    Save(String),

    /// Error loading checkpoint.
    #[error("Failed to load checkpoint: {0}")]
    Load(String),

    /// The weights belong to a different backbone family.
    #[error("Checkpoint holds a {found} network but a {expected} network was configured")]
    Architecture {
        /// Family of the configured network.
        expected: BackboneFamily,
        /// Family found in the checkpoint.
        found: BackboneFamily,
    },

    /// The output layer has a different width than configured.
    #[error("Output width mismatch in checkpoint {source_name}: {found} outputs, {expected} configured")]
    OutputWidth {
        /// Where the width was read (`weights` or `sidecar`).
        source_name: &'static str,
        /// Configured width.
        expected: usize,
        /// Width found in the checkpoint.
        found: usize,
    },

    /// The weights do not fit the configured network structure.
    #[error("Checkpoint does not fit the configured network at {at}: {detail}")]
    Shape {
        /// Position inside the network, e.g. `model.stages.1.blocks`.
        at: String,
        /// What differs.
        detail: String,
    },

    /// The configured network could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Path the recorder reads or writes for `path`.
pub fn checkpoint_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension(CHECKPOINT_EXTENSION)
}

/// Sidecar path for `path`.
pub fn metadata_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension("json")
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Save a network as a bare record. Returns the written path.
pub fn save_network<B: Backend>(net: &InspectionNet<B>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = checkpoint_path(path);
    recorder()
        .record(net.clone().into_record(), path.clone())
        .map_err(|e| CheckpointError::Save(e.to_string()))?;
    tracing::debug!(path = %path.display(), "Saved bare network checkpoint");
    Ok(path)
}

/// Save a network wrapped in a training checkpoint. Returns the written path.
pub fn save_training_checkpoint<B: Backend>(
    net: &InspectionNet<B>,
    epoch: Option<usize>,
    best_metric: Option<f64>,
    path: impl AsRef<Path>,
) -> Result<PathBuf> {
    let path = checkpoint_path(path);
    let checkpoint = TrainingCheckpoint::<B> {
        model_state: net.clone().into_record(),
        epoch,
        best_metric,
    };
    recorder()
        .record(checkpoint, path.clone())
        .map_err(|e| CheckpointError::Save(e.to_string()))?;
    tracing::debug!(path = %path.display(), ?epoch, "Saved training checkpoint");
    Ok(path)
}

fn record_family<B: Backend>(record: &NetworkRecord<B>) -> BackboneFamily {
    match record {
        InspectionNetRecord::CustomCnn(_) => BackboneFamily::CustomCnn,
        InspectionNetRecord::ResNet(_) => BackboneFamily::ResNet,
        InspectionNetRecord::EfficientNet(_) => BackboneFamily::EfficientNet,
    }
}

/// Build the network described by `config` and load weights into it.
///
/// # Errors
///
/// - [`CheckpointError::NotFound`] when no weights file exists
/// - [`CheckpointError::Load`] when neither layout can be decoded
/// - [`CheckpointError::Architecture`] when the weights are for another family
/// - [`CheckpointError::OutputWidth`] when the weights or the sidecar disagree
///   with the configured number of outputs
/// - [`CheckpointError::Shape`] when any other tensor or block count differs
/// - [`CheckpointError::Registry`] when the network cannot be built
pub fn load_network<B: Backend>(
    config: &NetworkConfig,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(InspectionNet<B>, CheckpointInfo)> {
    let path = checkpoint_path(path);
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path));
    }

    let net = InspectionNet::<B>::new(config, device)?;

    let (record, info) = match recorder().load::<TrainingCheckpoint<B>>(path.clone(), device) {
        Ok(checkpoint) => {
            let info = CheckpointInfo {
                path: path.clone(),
                layout: CheckpointLayout::Wrapped,
                epoch: checkpoint.epoch,
                best_metric: checkpoint.best_metric,
            };
            (checkpoint.model_state, info)
        }
        Err(wrapped_err) => {
            let record = recorder()
                .load::<NetworkRecord<B>>(path.clone(), device)
                .map_err(|bare_err| {
                    CheckpointError::Load(format!(
                        "{}: not a training checkpoint ({wrapped_err}) nor a bare network record ({bare_err})",
                        path.display()
                    ))
                })?;
            let info = CheckpointInfo {
                path: path.clone(),
                layout: CheckpointLayout::Bare,
                epoch: None,
                best_metric: None,
            };
            (record, info)
        }
    };

    let found = record_family::<B>(&record);
    if found != net.family() {
        return Err(CheckpointError::Architecture {
            expected: net.family(),
            found,
        });
    }

    let expected_outputs = net.n_outputs();
    let found_outputs = record_outputs(&record);
    if found_outputs != expected_outputs {
        return Err(CheckpointError::OutputWidth {
            source_name: "weights",
            expected: expected_outputs,
            found: found_outputs,
        });
    }
    if let Some(sidecar) = CheckpointMetadata::load_sidecar(&path)? {
        if sidecar.n_outputs != expected_outputs {
            return Err(CheckpointError::OutputWidth {
                source_name: "sidecar",
                expected: expected_outputs,
                found: sidecar.n_outputs,
            });
        }
    }
    record.check_shape(&net.clone().into_record(), "model")?;

    tracing::info!(
        path = %path.display(),
        layout = ?info.layout,
        epoch = ?info.epoch,
        best_metric = ?info.best_metric,
        "Loaded network checkpoint"
    );

    Ok((net.load_record(record), info))
}
