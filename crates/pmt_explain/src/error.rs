//! Error types for saliency computation and overlay rendering.

use thiserror::Error;

/// Errors raised while explaining a prediction.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// The feature tap never produced an activation or a gradient.
    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    /// Target output index is out of range.
    #[error("Target index {target} out of range for a model with {n_outputs} outputs")]
    InvalidTarget {
        /// Requested output index.
        target: usize,
        /// Number of model outputs.
        n_outputs: usize,
    },

    /// Input or map has an unexpected shape.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Tensor data could not be read back.
    #[error("Tensor error: {0}")]
    Tensor(String),
}

/// Result type for explain operations.
pub type Result<T> = std::result::Result<T, ExplainError>;
