//! Supported backbone kinds.
//!
//! Architectures are a closed set: each [`BackboneKind`] pairs a canonical
//! name with a default [`BackboneConfig`], and every config variant knows how
//! to build its family and where its feature tap sits. There is no string
//! dispatch beyond parsing the name once.
//!
//! # Example
//!
//! ```rust,ignore
//! use pmt_models::{BackboneKind, NetworkConfig, InspectionNet};
//!
//! let kind: BackboneKind = "efficientnet_b0".parse()?;
//! let config = NetworkConfig::regressor(kind);
//! let model = InspectionNet::<NdArray>::new(&config, &device)?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cnn::{CustomCnnConfig, EfficientNetConfig, ResNetConfig};

/// Error type for backbone selection and construction.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Architecture name is not one of the supported kinds.
    #[error("Unknown backbone '{0}' (expected one of: custom_cnn, resnet18, resnet34, efficientnet_b0)")]
    UnknownBackbone(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured structure has no spatial layer to tap.
    #[error("No feature tap in {family} backbone: {reason}")]
    NoFeatureTap {
        /// Backbone family being built.
        family: BackboneFamily,
        /// Which structural element is missing.
        reason: String,
    },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Structural family of a backbone; determines the tap rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneFamily {
    /// Compact stack of double-convolution blocks.
    CustomCnn,
    /// Residual network of basic blocks.
    ResNet,
    /// Mobile inverted bottleneck stages ending in an activation block.
    EfficientNet,
}

impl fmt::Display for BackboneFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CustomCnn => "custom CNN",
            Self::ResNet => "ResNet",
            Self::EfficientNet => "EfficientNet",
        };
        f.write_str(name)
    }
}

/// A supported architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    /// Four conv blocks (32, 64, 128, 256 filters).
    CustomCnn,
    /// ResNet-18 (2-2-2-2 basic blocks).
    #[serde(rename = "resnet18")]
    ResNet18,
    /// ResNet-34 (3-4-6-3 basic blocks).
    #[serde(rename = "resnet34")]
    ResNet34,
    /// EfficientNet-B0.
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
}

impl BackboneKind {
    /// Every supported kind.
    pub const ALL: [BackboneKind; 4] = [
        Self::CustomCnn,
        Self::ResNet18,
        Self::ResNet34,
        Self::EfficientNetB0,
    ];

    /// Canonical architecture name.
    pub fn name(self) -> &'static str {
        match self {
            Self::CustomCnn => "custom_cnn",
            Self::ResNet18 => "resnet18",
            Self::ResNet34 => "resnet34",
            Self::EfficientNetB0 => "efficientnet_b0",
        }
    }

    /// Structural family.
    pub fn family(self) -> BackboneFamily {
        match self {
            Self::CustomCnn => BackboneFamily::CustomCnn,
            Self::ResNet18 | Self::ResNet34 => BackboneFamily::ResNet,
            Self::EfficientNetB0 => BackboneFamily::EfficientNet,
        }
    }

    /// Default structure for this kind.
    pub fn config(self) -> BackboneConfig {
        match self {
            Self::CustomCnn => BackboneConfig::CustomCnn(CustomCnnConfig::default()),
            Self::ResNet18 => BackboneConfig::ResNet(ResNetConfig::resnet18()),
            Self::ResNet34 => BackboneConfig::ResNet(ResNetConfig::resnet34()),
            Self::EfficientNetB0 => BackboneConfig::EfficientNet(EfficientNetConfig::b0()),
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == normalized)
            .ok_or_else(|| RegistryError::UnknownBackbone(s.to_string()))
    }
}

/// Structure of a backbone, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum BackboneConfig {
    /// Compact custom CNN.
    CustomCnn(CustomCnnConfig),
    /// ResNet of basic blocks.
    #[serde(rename = "resnet")]
    ResNet(ResNetConfig),
    /// EfficientNet.
    #[serde(rename = "efficientnet")]
    EfficientNet(EfficientNetConfig),
}

impl BackboneConfig {
    /// Structural family of this config.
    pub fn family(&self) -> BackboneFamily {
        match self {
            Self::CustomCnn(_) => BackboneFamily::CustomCnn,
            Self::ResNet(_) => BackboneFamily::ResNet,
            Self::EfficientNet(_) => BackboneFamily::EfficientNet,
        }
    }

    /// Number of channels at the feature tap.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoFeatureTap`] when the structure has no
    /// spatial layer to tap.
    pub fn tap_channels(&self) -> Result<usize> {
        match self {
            Self::CustomCnn(c) => c.tap_channels(),
            Self::ResNet(c) => c.tap_channels(),
            Self::EfficientNet(c) => c.tap_channels(),
        }
    }

    /// Human readable location of the feature tap.
    pub fn tap_layer(&self) -> &'static str {
        match self.family() {
            BackboneFamily::CustomCnn => "last conv block",
            BackboneFamily::ResNet => "last basic block of the last stage",
            BackboneFamily::EfficientNet => "head conv-bn-silu activation block",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("custom_cnn".parse::<BackboneKind>().unwrap(), BackboneKind::CustomCnn);
        assert_eq!("ResNet18".parse::<BackboneKind>().unwrap(), BackboneKind::ResNet18);
        assert_eq!(
            "efficientnet-b0".parse::<BackboneKind>().unwrap(),
            BackboneKind::EfficientNetB0
        );
        for kind in BackboneKind::ALL {
            assert_eq!(kind.name().parse::<BackboneKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let err = "vgg16".parse::<BackboneKind>().unwrap_err();
        assert!(matches!(err, RegistryError::UnknownBackbone(ref n) if n == "vgg16"));
    }

    #[test]
    fn test_default_tap_channels() {
        assert_eq!(BackboneKind::CustomCnn.config().tap_channels().unwrap(), 256);
        assert_eq!(BackboneKind::ResNet18.config().tap_channels().unwrap(), 512);
        assert_eq!(BackboneKind::ResNet34.config().tap_channels().unwrap(), 512);
        assert_eq!(BackboneKind::EfficientNetB0.config().tap_channels().unwrap(), 1280);
    }

    #[test]
    fn test_kind_family() {
        assert_eq!(BackboneKind::ResNet34.family(), BackboneFamily::ResNet);
        for kind in BackboneKind::ALL {
            assert_eq!(kind.config().family(), kind.family());
        }
    }

    #[test]
    fn test_config_serde_tag() {
        let json = serde_json::to_value(BackboneKind::ResNet18.config()).unwrap();
        assert_eq!(json["family"], "resnet");
        let back: BackboneConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, BackboneKind::ResNet18.config());
    }
}
