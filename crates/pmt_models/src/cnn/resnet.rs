//! ResNet model architecture for images.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::registry::{BackboneFamily, RegistryError, Result};
use crate::traits::{pool_flatten, FeatureTap, TapPoint};

/// Configuration for ResNet model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Channels produced by the 7x7 stem.
    pub stem_channels: usize,
    /// Number of basic blocks in each stage.
    pub layers: Vec<usize>,
    /// Channels of each stage.
    pub widths: Vec<usize>,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self::resnet18()
    }
}

impl ResNetConfig {
    /// ResNet-18 layout.
    pub fn resnet18() -> Self {
        Self {
            in_channels: 3,
            stem_channels: 64,
            layers: vec![2, 2, 2, 2],
            widths: vec![64, 128, 256, 512],
        }
    }

    /// ResNet-34 layout.
    pub fn resnet34() -> Self {
        Self {
            layers: vec![3, 4, 6, 3],
            ..Self::resnet18()
        }
    }

    /// Channels of the last stage.
    pub fn tap_channels(&self) -> Result<usize> {
        if self.layers.len() != self.widths.len() {
            return Err(RegistryError::InvalidConfig(format!(
                "ResNet has {} stage depths but {} stage widths",
                self.layers.len(),
                self.widths.len()
            )));
        }
        match (self.layers.last(), self.widths.last()) {
            (Some(&depth), Some(&width)) if depth > 0 && width > 0 => Ok(width),
            (Some(_), Some(_)) => Err(RegistryError::NoFeatureTap {
                family: BackboneFamily::ResNet,
                reason: "last stage has no blocks or no channels".to_string(),
            }),
            _ => Err(RegistryError::NoFeatureTap {
                family: BackboneFamily::ResNet,
                reason: "no residual stages configured".to_string(),
            }),
        }
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, n_outputs: usize, device: &B::Device) -> Result<ResNet<B>> {
        ResNet::new(self, n_outputs, device)
    }
}

/// Residual block with two 3x3 convolutions and a skip connection.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    shortcut: Option<Conv2d<B>>,
    shortcut_bn: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> BasicBlock<B> {
    /// Create a new residual block.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        // Projection shortcut when the shape changes
        let (shortcut, shortcut_bn) = if stride != 1 || in_channels != out_channels {
            let sc = Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device);
            let sc_bn = BatchNormConfig::new(out_channels).init(device);
            (Some(sc), Some(sc_bn))
        } else {
            (None, None)
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            shortcut,
            shortcut_bn,
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let relu = Relu::new();

        let out = self.conv1.forward(x.clone());
        let out = self.bn1.forward(out);
        let out = relu.forward(out);

        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);

        let shortcut = if let (Some(sc), Some(sc_bn)) = (&self.shortcut, &self.shortcut_bn) {
            sc_bn.forward(sc.forward(x))
        } else {
            x
        };

        relu.forward(out + shortcut)
    }
}

/// One resolution stage of basic blocks.
#[derive(Module, Debug)]
pub struct ResNetStage<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNetStage<B> {
    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// ResNet with a linear regression or classification head.
///
/// The feature tap is the output of the last basic block of the last stage.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    stages: Vec<ResNetStage<B>>,
    fc: Linear<B>,
    tap_channels: usize,
    n_outputs: usize,
}

impl<B: Backend> ResNet<B> {
    /// Create a new ResNet model.
    pub fn new(config: &ResNetConfig, n_outputs: usize, device: &B::Device) -> Result<Self> {
        let tap_channels = config.tap_channels()?;
        if config.in_channels == 0 || config.stem_channels == 0 || config.widths.contains(&0) {
            return Err(RegistryError::InvalidConfig(
                "ResNet channels must be positive".to_string(),
            ));
        }

        let stem_conv = Conv2dConfig::new([config.in_channels, config.stem_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(config.stem_channels).init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut stages = Vec::with_capacity(config.layers.len());
        let mut in_channels = config.stem_channels;
        for (i, (&depth, &width)) in config.layers.iter().zip(&config.widths).enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(depth);
            for b in 0..depth {
                let block_stride = if b == 0 { stride } else { 1 };
                blocks.push(BasicBlock::new(in_channels, width, block_stride, device));
                in_channels = width;
            }
            stages.push(ResNetStage { blocks });
        }

        let fc = LinearConfig::new(tap_channels, n_outputs).init(device);

        Ok(Self {
            stem_conv,
            stem_bn,
            stem_pool,
            stages,
            fc,
            tap_channels,
            n_outputs,
        })
    }
}

impl<B: Backend> FeatureTap<B> for ResNet<B> {
    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem_conv.forward(x);
        let x = Relu::new().forward(self.stem_bn.forward(x));
        let x = self.stem_pool.forward(x);
        self.stages.iter().fold(x, |x, stage| stage.forward(x))
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(pool_flatten(features))
    }

    fn tap_point(&self) -> TapPoint {
        TapPoint {
            family: BackboneFamily::ResNet,
            layer: "last basic block of the last stage",
            channels: self.tap_channels,
        }
    }

    fn n_outputs(&self) -> usize {
        self.n_outputs
    }
}
