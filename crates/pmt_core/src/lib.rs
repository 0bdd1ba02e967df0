//! # pmt_core
//!
//! Core types for image-based power transformer condition assessment.
//!
//! This crate provides:
//! - [`SeverityDimension`] naming the 13 scored defect categories, in output order
//! - [`SeverityVector`] holding 13 clamped scores with a derived overall sum
//! - [`GateDecision`] for the PMT / non-PMT gate
//! - [`Preprocessor`] and [`PreparedImage`] for decoding and normalising inputs
//! - Error types and backend aliases
//!
//! ## Tensor Convention
//!
//! Model inputs follow `(B, C, H, W)` with `B = 1`, `C = 3` (RGB) and a square
//! `H = W = image_size`, channel-normalised with ImageNet statistics.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pmt_core::{Preprocessor, PreprocessConfig, SeverityVector};
//!
//! let pre = Preprocessor::new(PreprocessConfig::new(224))?;
//! let (loaded, prepared) = pre.load_and_prepare("tx_001.jpg")?;
//! let scores = SeverityVector::from_raw(&raw_outputs)?;
//! println!("overall = {}", scores.overall());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod decision;
mod error;
mod preprocess;
mod severity;

pub use decision::{GateDecision, NON_TARGET_CLASS};
pub use error::{CoreError, Result};
pub use preprocess::{
    LoadedImage, PreparedImage, PreprocessConfig, Preprocessor, DEFAULT_IMAGE_SIZE, IMAGENET_MEAN,
    IMAGENET_STD,
};
pub use severity::{
    argmax, clamp_severity, SeverityDimension, SeverityVector, MAX_SEVERITY, MIN_SEVERITY,
    NUM_DIMENSIONS,
};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;

    #[cfg(feature = "backend-ndarray")]
    pub use burn_autodiff::Autodiff;

    /// CPU backend with gradient tracking, used by the explain path.
    #[cfg(feature = "backend-ndarray")]
    pub type CpuAutodiff = Autodiff<NdArray>;
}
