//! Gate decisions.

use serde::{Deserialize, Serialize};

use crate::severity::argmax;

/// Class index the gate classifier uses for "not a transformer".
pub const NON_TARGET_CLASS: usize = 0;

/// Outcome of the PMT gate for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// The image depicts a transformer; later stages run.
    Accepted,
    /// The image is not a transformer photo; no later stage runs.
    Rejected,
}

impl GateDecision {
    /// Decide from classifier logits (or probabilities).
    ///
    /// Rejected when the argmax class is [`NON_TARGET_CLASS`]. Logits with no
    /// comparable value are rejected as well.
    pub fn from_logits(logits: &[f32]) -> Self {
        match argmax(logits) {
            Some(NON_TARGET_CLASS) | None => Self::Rejected,
            Some(_) => Self::Accepted,
        }
    }

    /// Whether later stages should run.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}
