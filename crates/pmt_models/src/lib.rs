//! # pmt_models
//!
//! Image backbones for power transformer inspection, each split at an explicit
//! feature tap.
//!
//! ## Backbones
//! - [`CustomCnn`] - compact stack of double-convolution blocks
//! - [`ResNet`] - ResNet-18 / ResNet-34 of basic residual blocks
//! - [`EfficientNet`] - EfficientNet-B0 of MBConv blocks
//!
//! Every backbone implements [`FeatureTap`]: `features` returns the last
//! spatial feature map and `head` maps it to the outputs. [`InspectionNet`]
//! wraps whichever family a [`NetworkConfig`] selects and is what the gate and
//! the severity regressor load from checkpoints.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod cnn;
pub mod network;
mod record_shape;
pub mod registry;
pub mod traits;

pub use checkpoint::{
    checkpoint_path, load_network, metadata_path, save_network, save_training_checkpoint,
    CheckpointError, CheckpointInfo, CheckpointLayout, CheckpointMetadata, NetworkRecord,
    TrainingCheckpoint,
};
pub use cnn::*;
pub use network::{InspectionNet, NetworkConfig, GATE_OUTPUTS, REGRESSOR_OUTPUTS};
pub use registry::{BackboneConfig, BackboneFamily, BackboneKind, RegistryError};
pub use traits::{FeatureTap, TapPoint};
