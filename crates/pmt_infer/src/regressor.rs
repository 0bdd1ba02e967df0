//! Severity regression over the 13 defect dimensions.

use std::fmt;
use std::sync::Arc;

use pmt_core::{argmax, PreparedImage, SeverityDimension, SeverityVector, NUM_DIMENSIONS};
use pmt_explain::SaliencyMap;

use crate::error::{InferError, Result};
use crate::session::ExplainableModel;

/// Scores for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityPrediction {
    raw: Vec<f32>,
    scores: SeverityVector,
}

impl SeverityPrediction {
    /// Clamp raw model outputs into a prediction.
    pub fn from_raw(raw: Vec<f32>) -> Result<Self> {
        let scores = SeverityVector::from_raw(&raw)?;
        Ok(Self { raw, scores })
    }

    /// Unclamped model outputs.
    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    /// Clamped scores.
    pub fn scores(&self) -> &SeverityVector {
        &self.scores
    }

    /// Sum of the clamped scores.
    pub fn overall(&self) -> f32 {
        self.scores.overall()
    }

    /// Saliency target: the dimension with the largest raw output.
    pub fn target(&self) -> SeverityDimension {
        argmax(&self.raw)
            .and_then(SeverityDimension::from_index)
            .unwrap_or_else(|| self.scores.worst())
    }
}

/// Thirteen-output regressor with an explain path.
#[derive(Clone)]
pub struct SeverityRegressor {
    model: Arc<dyn ExplainableModel>,
}

impl SeverityRegressor {
    /// Wrap a 13-output model.
    ///
    /// # Errors
    ///
    /// [`InferError::Configuration`] for any other output width.
    pub fn new(model: Arc<dyn ExplainableModel>) -> Result<Self> {
        if model.n_outputs() != NUM_DIMENSIONS {
            return Err(InferError::Configuration(format!(
                "severity regressor must have {NUM_DIMENSIONS} outputs, got {}",
                model.n_outputs()
            )));
        }
        Ok(Self { model })
    }

    /// Fast numeric pass.
    pub fn predict(&self, image: &PreparedImage) -> Result<SeverityPrediction> {
        SeverityPrediction::from_raw(self.model.forward(image)?)
    }

    /// Separate gradient-tracked pass for one dimension.
    pub fn explain(&self, image: &PreparedImage, target: SeverityDimension) -> Result<SaliencyMap> {
        self.model.explain(image, target.index())
    }
}

impl fmt::Debug for SeverityRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeverityRegressor")
            .field("n_outputs", &self.model.n_outputs())
            .finish()
    }
}
