//! # pmt_explain
//!
//! Visual explanations for inspection models.
//!
//! This crate provides:
//! - [`TapCapture`] holding the activation and gradient of one in-flight call
//! - [`SaliencyEngine`] computing gradient-weighted class activation maps
//! - [`OverlayRenderer`] compositing a colour-mapped [`SaliencyMap`] over the
//!   original image

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod capture;
mod error;
mod overlay;
mod saliency;

pub use capture::TapCapture;
pub use error::{ExplainError, Result};
pub use overlay::{jet, resize_map, OverlayRenderer, OVERLAY_ALPHA};
pub use saliency::{grad_cam, normalize, SaliencyEngine, SaliencyMap, NORMALIZE_EPSILON};
