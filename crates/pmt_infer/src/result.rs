//! Request and result types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use pmt_core::{SeverityDimension, SeverityVector};

use crate::error::{InferError, Result};

/// A batch of images to assess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceRequest {
    /// Image files, already on local storage.
    pub images: Vec<PathBuf>,
    /// Identifying fields echoed back unchanged (transformer id, location, ...).
    pub metadata: BTreeMap<String, String>,
}

impl InferenceRequest {
    /// Create a request for `images`.
    pub fn new<P: Into<PathBuf>>(images: impl IntoIterator<Item = P>) -> Self {
        Self {
            images: images.into_iter().map(Into::into).collect(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Per-image pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStage {
    /// Path received.
    Loaded,
    /// Decoded, preprocessed and gated.
    GateChecked,
    /// Gate said no; terminal.
    Rejected,
    /// Severity vector recorded.
    SeverityScored,
    /// Overlay written.
    SaliencyDone,
    /// Saliency or overlay failed; scores kept.
    SaliencySkipped,
    /// Decode or scoring failed; terminal.
    Error,
    /// Outcome recorded.
    Finalized,
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "LOADED",
            Self::GateChecked => "GATE_CHECKED",
            Self::Rejected => "REJECTED",
            Self::SeverityScored => "SEVERITY_SCORED",
            Self::SaliencyDone => "SALIENCY_DONE",
            Self::SaliencySkipped => "SALIENCY_SKIPPED",
            Self::Error => "ERROR",
            Self::Finalized => "FINALIZED",
        };
        f.write_str(name)
    }
}

/// What happened to one input image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageOutcome {
    /// Severity scores were produced.
    Scored {
        /// Input path.
        path: PathBuf,
        /// Clamped scores in dimension order.
        scores: SeverityVector,
        /// Sum of the clamped scores.
        overall_sum: f32,
        /// Dimension the saliency map explains.
        target_dimension: SeverityDimension,
        /// Overlay URL, when one was written.
        overlay: Option<String>,
        /// Why no overlay was written.
        saliency_error: Option<String>,
    },
    /// The gate rejected the image.
    Rejected {
        /// Input path.
        path: PathBuf,
    },
    /// The image could not be decoded or scored.
    Error {
        /// Input path.
        path: PathBuf,
        /// Failure description.
        message: String,
    },
}

impl ImageOutcome {
    /// Input path.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Scored { path, .. } | Self::Rejected { path } | Self::Error { path, .. } => path,
        }
    }

    /// Scores, for scored images.
    pub fn scores(&self) -> Option<&SeverityVector> {
        match self {
            Self::Scored { scores, .. } => Some(scores),
            _ => None,
        }
    }

    /// Overlay URL, for scored images with an overlay.
    pub fn overlay(&self) -> Option<&str> {
        match self {
            Self::Scored { overlay, .. } => overlay.as_deref(),
            _ => None,
        }
    }

    /// Terminal stage before finalisation.
    pub fn stage(&self) -> ImageStage {
        match self {
            Self::Scored { overlay: Some(_), .. } => ImageStage::SaliencyDone,
            Self::Scored { .. } => ImageStage::SaliencySkipped,
            Self::Rejected { .. } => ImageStage::Rejected,
            Self::Error { .. } => ImageStage::Error,
        }
    }

    /// Whether severity scores were produced.
    pub fn is_scored(&self) -> bool {
        matches!(self, Self::Scored { .. })
    }

    /// Whether the gate rejected the image.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Whether the image failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Process-wide conditions reported with every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// No gate model; every image was treated as a transformer photo.
    GateUnavailable {
        /// Why the gate is missing.
        reason: String,
    },
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// One outcome per input, in input order.
    pub images: Vec<ImageOutcome>,
    /// Element-wise mean over scored images.
    pub mean_scores: Option<SeverityVector>,
    /// Mean overall sum over scored images.
    pub mean_overall: Option<f32>,
    /// Overlay URL per input, in input order.
    pub overlays: Vec<Option<String>>,
    /// Whether the gate was unavailable.
    pub degraded: bool,
    /// Process-wide warnings.
    pub warnings: Vec<PipelineWarning>,
    /// Request metadata, unchanged.
    pub metadata: BTreeMap<String, String>,
}

impl BatchResult {
    /// Aggregate per-image outcomes.
    ///
    /// Means cover scored images only; rejected and failed images stay in the
    /// per-image list but do not contribute.
    pub fn new(
        images: Vec<ImageOutcome>,
        warnings: Vec<PipelineWarning>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let mean_scores = SeverityVector::mean(images.iter().filter_map(ImageOutcome::scores));

        let overall: Vec<f64> = images
            .iter()
            .filter_map(ImageOutcome::scores)
            .map(|s| f64::from(s.overall()))
            .collect();
        let mean_overall = if overall.is_empty() {
            None
        } else {
            Some((overall.iter().sum::<f64>() / overall.len() as f64) as f32)
        };

        let overlays = images
            .iter()
            .map(|o| o.overlay().map(str::to_string))
            .collect();
        let degraded = warnings
            .iter()
            .any(|w| matches!(w, PipelineWarning::GateUnavailable { .. }));

        Self {
            images,
            mean_scores,
            mean_overall,
            overlays,
            degraded,
            warnings,
            metadata,
        }
    }

    /// Number of scored images.
    pub fn n_scored(&self) -> usize {
        self.images.iter().filter(|o| o.is_scored()).count()
    }

    /// Number of rejected images.
    pub fn n_rejected(&self) -> usize {
        self.images.iter().filter(|o| o.is_rejected()).count()
    }

    /// Number of failed images.
    pub fn n_errors(&self) -> usize {
        self.images.iter().filter(|o| o.is_error()).count()
    }

    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| InferError::Serialization(e.to_string()))
    }
}
