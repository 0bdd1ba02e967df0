//! # pmt_infer
//!
//! Two-stage inference over batches of transformer photographs.
//!
//! A [`Gate`] first decides whether each image shows a power transformer at
//! all. Accepted images are scored by the [`SeverityRegressor`] on 13 defect
//! dimensions, and a Grad-CAM overlay of the most severe dimension is written
//! through an [`ArtifactStore`]. The [`InferenceOrchestrator`] ties the stages
//! together and isolates failures per image.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pmt_infer::{InferenceOrchestrator, InferenceRequest, PipelineConfig};
//!
//! let config = PipelineConfig::from_file("pipeline.json")?.with_env_overrides();
//! let pipeline = InferenceOrchestrator::from_config::<CpuAutodiff>(&config, &device)?;
//! let result = pipeline.run(&InferenceRequest::new(["tx_001.jpg", "tx_002.jpg"]));
//! println!("{}", result.to_json()?);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod artifacts;
mod config;
mod error;
mod gate;
mod orchestrator;
mod regressor;
mod result;
mod session;

pub use artifacts::{overlay_file_name, ArtifactStore, DirectoryStore, OVERLAY_PREFIX};
pub use config::{
    best_checkpoint, ModelSpec, PipelineConfig, CHECKPOINT_DIR, GRADCAM_DIR, OUTPUT_ROOT_ENV,
};
pub use error::{InferError, Result};
pub use gate::Gate;
pub use orchestrator::InferenceOrchestrator;
pub use regressor::{SeverityPrediction, SeverityRegressor};
pub use result::{BatchResult, ImageOutcome, ImageStage, InferenceRequest, PipelineWarning};
pub use session::{ExplainableModel, InferenceSession, ScoringModel};
