//! The concrete network used by the gate and the severity regressor.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use pmt_core::NUM_DIMENSIONS;

use crate::cnn::{CustomCnn, EfficientNet, ResNet};
use crate::registry::{BackboneConfig, BackboneFamily, BackboneKind, RegistryError, Result};
use crate::traits::{FeatureTap, TapPoint};

/// Outputs of the power-transformer gate (non-target, target).
pub const GATE_OUTPUTS: usize = 2;

/// Outputs of the severity regressor, one per dimension.
pub const REGRESSOR_OUTPUTS: usize = NUM_DIMENSIONS;

/// Structure of an [`InspectionNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Backbone structure.
    pub backbone: BackboneConfig,
    /// Width of the output layer.
    pub n_outputs: usize,
}

impl NetworkConfig {
    /// Create a config from a backbone structure and output width.
    pub fn new(backbone: BackboneConfig, n_outputs: usize) -> Self {
        Self { backbone, n_outputs }
    }

    /// Default structure of `kind` with `n_outputs` outputs.
    pub fn from_kind(kind: BackboneKind, n_outputs: usize) -> Self {
        Self::new(kind.config(), n_outputs)
    }

    /// Severity regressor with 13 outputs.
    pub fn regressor(kind: BackboneKind) -> Self {
        Self::from_kind(kind, REGRESSOR_OUTPUTS)
    }

    /// Binary power-transformer gate.
    pub fn gate(kind: BackboneKind) -> Self {
        Self::from_kind(kind, GATE_OUTPUTS)
    }

    /// Initialize the network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<InspectionNet<B>> {
        InspectionNet::new(self, device)
    }
}

/// A backbone of any supported family with its head attached.
#[derive(Module, Debug)]
pub enum InspectionNet<B: Backend> {
    /// Compact custom CNN.
    CustomCnn(CustomCnn<B>),
    /// ResNet-18 / ResNet-34.
    ResNet(ResNet<B>),
    /// EfficientNet-B0.
    EfficientNet(EfficientNet<B>),
}

impl<B: Backend> InspectionNet<B> {
    /// Build a network, resolving its feature tap.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::NoFeatureTap`] when the structure has no
    /// spatial layer to tap, or [`RegistryError::InvalidConfig`] for a zero
    /// output width or malformed structure.
    pub fn new(config: &NetworkConfig, device: &B::Device) -> Result<Self> {
        if config.n_outputs == 0 {
            return Err(RegistryError::InvalidConfig(
                "network must have at least one output".to_string(),
            ));
        }
        let n = config.n_outputs;
        let net = match &config.backbone {
            BackboneConfig::CustomCnn(c) => Self::CustomCnn(c.init(n, device)?),
            BackboneConfig::ResNet(c) => Self::ResNet(c.init(n, device)?),
            BackboneConfig::EfficientNet(c) => Self::EfficientNet(c.init(n, device)?),
        };
        tracing::debug!(
            family = %net.family(),
            tap_channels = net.tap_point().channels,
            n_outputs = n,
            "Built inspection network"
        );
        Ok(net)
    }

    /// Backbone family.
    pub fn family(&self) -> BackboneFamily {
        match self {
            Self::CustomCnn(_) => BackboneFamily::CustomCnn,
            Self::ResNet(_) => BackboneFamily::ResNet,
            Self::EfficientNet(_) => BackboneFamily::EfficientNet,
        }
    }
}

impl<B: Backend> FeatureTap<B> for InspectionNet<B> {
    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::CustomCnn(m) => m.features(x),
            Self::ResNet(m) => m.features(x),
            Self::EfficientNet(m) => m.features(x),
        }
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Self::CustomCnn(m) => m.head(features),
            Self::ResNet(m) => m.head(features),
            Self::EfficientNet(m) => m.head(features),
        }
    }

    fn tap_point(&self) -> TapPoint {
        match self {
            Self::CustomCnn(m) => m.tap_point(),
            Self::ResNet(m) => m.tap_point(),
            Self::EfficientNet(m) => m.tap_point(),
        }
    }

    fn n_outputs(&self) -> usize {
        match self {
            Self::CustomCnn(m) => m.n_outputs(),
            Self::ResNet(m) => m.n_outputs(),
            Self::EfficientNet(m) => m.n_outputs(),
        }
    }
}
