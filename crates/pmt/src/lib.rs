//! # pmt
//!
//! Image-based power transformer condition assessment in Rust.
//!
//! pmt scores photographs of power transformers on 13 independent defect
//! dimensions and explains each score with a Grad-CAM heatmap:
//!
//! - **Core**: severity dimensions, gate decisions, image preprocessing
//! - **Models**: custom CNN, ResNet and EfficientNet backbones with explicit feature taps
//! - **Explainability**: saliency maps and heatmap overlays
//! - **Inference**: the gate / regressor / saliency pipeline with per-image error isolation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pmt::prelude::*;
//!
//! type B = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let config = PipelineConfig::default().with_env_overrides();
//! let pipeline = InferenceOrchestrator::from_config::<B>(&config, &device)?;
//!
//! let request = InferenceRequest::new(["photos/tx_001.jpg"])
//!     .with_metadata("transformer_id", "TX-104");
//! let result = pipeline.run(&request);
//! println!("mean overall: {:?}", result.mean_overall);
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use pmt_core as core;
pub use pmt_explain as explain;
pub use pmt_infer as infer;
pub use pmt_models as models;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use pmt::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use pmt_core::{
        GateDecision, PreparedImage, PreprocessConfig, Preprocessor, SeverityDimension,
        SeverityVector, NUM_DIMENSIONS,
    };

    #[cfg(feature = "backend-ndarray")]
    pub use pmt_core::backend::{Autodiff, CpuAutodiff, NdArray};

    // Models
    pub use pmt_models::{
        load_network, save_network, save_training_checkpoint, BackboneKind, CheckpointMetadata,
        FeatureTap, InspectionNet, NetworkConfig,
    };

    // Explain
    pub use pmt_explain::{OverlayRenderer, SaliencyEngine, SaliencyMap};

    // Inference
    pub use pmt_infer::{
        BatchResult, Gate, ImageOutcome, InferenceOrchestrator, InferenceRequest,
        InferenceSession, ModelSpec, PipelineConfig, SeverityRegressor,
    };
}
