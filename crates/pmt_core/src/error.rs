//! Error types for pmt_core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in pmt_core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The image file could not be read or decoded.
    #[error("Failed to decode image {path}: {reason}")]
    Decode {
        /// Path of the offending image.
        path: PathBuf,
        /// Underlying decoder message.
        reason: String,
    },

    /// A vector did not have the expected number of elements.
    #[error("Length mismatch: expected {expected} values, got {got}")]
    LengthMismatch {
        /// Expected number of values.
        expected: usize,
        /// Actual number of values.
        got: usize,
    },

    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Invalid preprocessing parameters.
    #[error("Invalid preprocessing configuration: {0}")]
    InvalidConfig(String),

    /// Unknown severity dimension name.
    #[error("Unknown severity dimension: {0}")]
    UnknownDimension(String),
}
