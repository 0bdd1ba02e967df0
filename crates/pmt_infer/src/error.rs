//! Error types for the inference pipeline.

use thiserror::Error;

use pmt_core::CoreError;
use pmt_explain::ExplainError;
use pmt_models::{CheckpointError, RegistryError};

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, InferError>;

/// Errors raised by the inference pipeline.
///
/// Configuration-class errors ([`InferError::is_configuration`]) are fatal at
/// startup. Everything else is attributed to a single image.
#[derive(Error, Debug)]
pub enum InferError {
    /// Invalid pipeline or model configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown architecture or unbuildable network.
    #[error("Model configuration error: {0}")]
    Registry(#[from] RegistryError),

    /// Checkpoint missing, unreadable or for another architecture.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Image decoding or preprocessing failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Saliency or overlay computation failed.
    #[error(transparent)]
    Explain(#[from] ExplainError),

    /// A forward pass produced unusable output.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Overlay could not be persisted.
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl InferError {
    /// Whether this error must abort startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Registry(_) | Self::Checkpoint(_)
        )
    }
}
