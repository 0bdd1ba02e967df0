//! The PMT gate: is this a photo of a power transformer?

use std::fmt;
use std::sync::Arc;

use pmt_core::{GateDecision, PreparedImage};
use pmt_models::GATE_OUTPUTS;

use crate::error::{InferError, Result};
use crate::session::ScoringModel;

/// Binary classifier in front of the severity regressor.
///
/// Without a model the gate is *unavailable* and accepts every image; the
/// orchestrator reports this as degraded mode.
#[derive(Clone, Default)]
pub struct Gate {
    model: Option<Arc<dyn ScoringModel>>,
}

impl Gate {
    /// Wrap a two-class model.
    ///
    /// # Errors
    ///
    /// [`InferError::Configuration`] unless the model has exactly two outputs.
    pub fn new(model: Arc<dyn ScoringModel>) -> Result<Self> {
        if model.n_outputs() != GATE_OUTPUTS {
            return Err(InferError::Configuration(format!(
                "gate model must have {GATE_OUTPUTS} outputs, got {}",
                model.n_outputs()
            )));
        }
        Ok(Self { model: Some(model) })
    }

    /// A gate without a model.
    pub fn unavailable() -> Self {
        Self { model: None }
    }

    /// Whether a model is loaded.
    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Decide whether `image` continues down the pipeline.
    pub fn decide(&self, image: &PreparedImage) -> Result<GateDecision> {
        match &self.model {
            Some(model) => {
                let logits = model.forward(image)?;
                Ok(GateDecision::from_logits(&logits))
            }
            None => Ok(GateDecision::Accepted),
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("available", &self.is_available())
            .finish()
    }
}
