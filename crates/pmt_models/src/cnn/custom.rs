//! Compact custom CNN.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::registry::{BackboneFamily, RegistryError, Result};
use crate::traits::{pool_flatten, FeatureTap, TapPoint};

/// Configuration for [`CustomCnn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCnnConfig {
    /// Number of input channels (3 for RGB).
    pub in_channels: usize,
    /// Output channels of each conv block; one block per entry.
    pub channels: Vec<usize>,
    /// Width of the hidden fully connected layer.
    pub hidden: usize,
}

impl Default for CustomCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            channels: vec![32, 64, 128, 256],
            hidden: 128,
        }
    }
}

impl CustomCnnConfig {
    /// Create a config with the given block widths.
    pub fn new(channels: Vec<usize>) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    /// Channels of the last conv block.
    pub fn tap_channels(&self) -> Result<usize> {
        match self.channels.last() {
            Some(&c) if c > 0 => Ok(c),
            Some(_) => Err(RegistryError::NoFeatureTap {
                family: BackboneFamily::CustomCnn,
                reason: "last conv block has zero channels".to_string(),
            }),
            None => Err(RegistryError::NoFeatureTap {
                family: BackboneFamily::CustomCnn,
                reason: "no conv blocks configured".to_string(),
            }),
        }
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, n_outputs: usize, device: &B::Device) -> Result<CustomCnn<B>> {
        CustomCnn::new(self, n_outputs, device)
    }
}

/// Two 3x3 convolutions with batch norm and ReLU, then a 2x2 max pool.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    pool: MaxPool2d,
    relu: Relu,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new conv block.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2,
            bn2: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let x = self.relu.forward(self.bn2.forward(self.conv2.forward(x)));
        self.pool.forward(x)
    }
}

/// Compact CNN: a stack of [`ConvBlock`]s, global average pooling and a
/// two-layer head.
///
/// The feature tap is the output of the last conv block.
#[derive(Module, Debug)]
pub struct CustomCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    relu: Relu,
    tap_channels: usize,
    n_outputs: usize,
}

impl<B: Backend> CustomCnn<B> {
    /// Create a new custom CNN.
    pub fn new(config: &CustomCnnConfig, n_outputs: usize, device: &B::Device) -> Result<Self> {
        let tap_channels = config.tap_channels()?;
        if config.channels.contains(&0) || config.in_channels == 0 {
            return Err(RegistryError::InvalidConfig(format!(
                "custom CNN channels must be positive, got in={} blocks={:?}",
                config.in_channels, config.channels
            )));
        }

        let mut blocks = Vec::with_capacity(config.channels.len());
        let mut in_channels = config.in_channels;
        for &out_channels in &config.channels {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        let fc1 = LinearConfig::new(tap_channels, config.hidden).init(device);
        let fc2 = LinearConfig::new(config.hidden, n_outputs).init(device);

        Ok(Self {
            blocks,
            fc1,
            fc2,
            relu: Relu::new(),
            tap_channels,
            n_outputs,
        })
    }
}

impl<B: Backend> FeatureTap<B> for CustomCnn<B> {
    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = pool_flatten(features);
        let x = self.relu.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    fn tap_point(&self) -> TapPoint {
        TapPoint {
            family: BackboneFamily::CustomCnn,
            layer: "last conv block",
            channels: self.tap_channels,
        }
    }

    fn n_outputs(&self) -> usize {
        self.n_outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_custom_cnn_shapes() {
        let device = Default::default();
        let config = CustomCnnConfig {
            in_channels: 3,
            channels: vec![4, 8],
            hidden: 6,
        };
        let model: CustomCnn<TestBackend> = config.init(13, &device).unwrap();

        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let features = model.features(x.clone());
        assert_eq!(features.dims(), [1, 8, 4, 4]);
        assert_eq!(model.forward(x).dims(), [1, 13]);
        assert_eq!(model.tap_point().channels, 8);
    }

    #[test]
    fn test_custom_cnn_without_blocks_has_no_tap() {
        let device = Default::default();
        let config = CustomCnnConfig::new(vec![]);
        let err = config.init::<TestBackend>(13, &device).unwrap_err();
        assert!(matches!(err, RegistryError::NoFeatureTap { .. }));
    }

    #[test]
    fn test_custom_cnn_default_config() {
        let config = CustomCnnConfig::default();
        assert_eq!(config.channels, vec![32, 64, 128, 256]);
        assert_eq!(config.tap_channels().unwrap(), 256);
    }
}
