//! EfficientNet backbone built from mobile inverted bottleneck blocks.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, silu};
use serde::{Deserialize, Serialize};

use crate::registry::{BackboneFamily, RegistryError, Result};
use crate::traits::{pool_flatten, FeatureTap, TapPoint};

/// One stage of repeated MBConv blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbStageConfig {
    /// Expansion ratio of the hidden width (1 disables the expansion conv).
    pub expand_ratio: usize,
    /// Depthwise kernel size.
    pub kernel_size: usize,
    /// Stride of the first block in the stage.
    pub stride: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Number of blocks.
    pub repeats: usize,
}

impl MbStageConfig {
    /// Create a stage config.
    pub const fn new(
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        out_channels: usize,
        repeats: usize,
    ) -> Self {
        Self {
            expand_ratio,
            kernel_size,
            stride,
            out_channels,
            repeats,
        }
    }
}

/// Configuration for [`EfficientNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficientNetConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Channels of the 3x3 stride-2 stem.
    pub stem_channels: usize,
    /// MBConv stages.
    pub stages: Vec<MbStageConfig>,
    /// Channels of the final 1x1 conv-bn-silu block (the feature tap).
    pub head_channels: usize,
    /// Squeeze-excitation width as a fraction of each block's input channels.
    pub se_ratio: f64,
}

impl Default for EfficientNetConfig {
    fn default() -> Self {
        Self::b0()
    }
}

impl EfficientNetConfig {
    /// EfficientNet-B0 layout.
    pub fn b0() -> Self {
        Self {
            in_channels: 3,
            stem_channels: 32,
            stages: vec![
                MbStageConfig::new(1, 3, 1, 16, 1),
                MbStageConfig::new(6, 3, 2, 24, 2),
                MbStageConfig::new(6, 5, 2, 40, 2),
                MbStageConfig::new(6, 3, 2, 80, 3),
                MbStageConfig::new(6, 5, 1, 112, 3),
                MbStageConfig::new(6, 5, 2, 192, 4),
                MbStageConfig::new(6, 3, 1, 320, 1),
            ],
            head_channels: 1280,
            se_ratio: 0.25,
        }
    }

    /// Channels of the head activation block.
    pub fn tap_channels(&self) -> Result<usize> {
        if self.head_channels == 0 {
            return Err(RegistryError::NoFeatureTap {
                family: BackboneFamily::EfficientNet,
                reason: "head activation block has zero channels".to_string(),
            });
        }
        Ok(self.head_channels)
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, n_outputs: usize, device: &B::Device) -> Result<EfficientNet<B>> {
        EfficientNet::new(self, n_outputs, device)
    }
}

/// Mobile inverted bottleneck block with squeeze-excitation.
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    expand: Option<Conv2d<B>>,
    expand_bn: Option<BatchNorm<B, 2>>,
    depthwise: Conv2d<B>,
    depthwise_bn: BatchNorm<B, 2>,
    se_reduce: Conv2d<B>,
    se_expand: Conv2d<B>,
    project: Conv2d<B>,
    project_bn: BatchNorm<B, 2>,
    residual: bool,
}

impl<B: Backend> MbConv<B> {
    /// Create a new MBConv block.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stage: &MbStageConfig,
        stride: usize,
        se_ratio: f64,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * stage.expand_ratio;
        let squeeze = ((in_channels as f64 * se_ratio).round() as usize).max(1);
        let pad = stage.kernel_size / 2;

        let (expand, expand_bn) = if stage.expand_ratio != 1 {
            let conv = Conv2dConfig::new([in_channels, hidden], [1, 1])
                .with_bias(false)
                .init(device);
            (Some(conv), Some(BatchNormConfig::new(hidden).init(device)))
        } else {
            (None, None)
        };

        let depthwise = Conv2dConfig::new([hidden, hidden], [stage.kernel_size, stage.kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_groups(hidden)
            .with_bias(false)
            .init(device);

        Self {
            expand,
            expand_bn,
            depthwise,
            depthwise_bn: BatchNormConfig::new(hidden).init(device),
            se_reduce: Conv2dConfig::new([hidden, squeeze], [1, 1]).init(device),
            se_expand: Conv2dConfig::new([squeeze, hidden], [1, 1]).init(device),
            project: Conv2dConfig::new([hidden, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            project_bn: BatchNormConfig::new(out_channels).init(device),
            residual: stride == 1 && in_channels == out_channels,
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let (Some(conv), Some(bn)) = (&self.expand, &self.expand_bn) {
            out = silu(bn.forward(conv.forward(out)));
        }
        let out = silu(self.depthwise_bn.forward(self.depthwise.forward(out)));

        // Squeeze-excitation
        let scale = out.clone().mean_dim(3).mean_dim(2);
        let scale = silu(self.se_reduce.forward(scale));
        let scale = sigmoid(self.se_expand.forward(scale));
        let out = out * scale;

        let out = self.project_bn.forward(self.project.forward(out));
        if self.residual {
            out + x
        } else {
            out
        }
    }
}

/// EfficientNet with a linear head.
///
/// The feature tap is the final 1x1 conv-bn-silu block, the last layer with a
/// spatial output before global pooling.
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    blocks: Vec<MbConv<B>>,
    head_conv: Conv2d<B>,
    head_bn: BatchNorm<B, 2>,
    fc: Linear<B>,
    tap_channels: usize,
    n_outputs: usize,
}

impl<B: Backend> EfficientNet<B> {
    /// Create a new EfficientNet.
    pub fn new(config: &EfficientNetConfig, n_outputs: usize, device: &B::Device) -> Result<Self> {
        let tap_channels = config.tap_channels()?;
        for stage in &config.stages {
            if stage.expand_ratio == 0
                || stage.kernel_size == 0
                || stage.stride == 0
                || stage.out_channels == 0
            {
                return Err(RegistryError::InvalidConfig(format!(
                    "invalid MBConv stage {stage:?}"
                )));
            }
        }
        if config.in_channels == 0 || config.stem_channels == 0 {
            return Err(RegistryError::InvalidConfig(
                "EfficientNet channels must be positive".to_string(),
            ));
        }

        let stem = Conv2dConfig::new([config.in_channels, config.stem_channels], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(config.stem_channels).init(device);

        let mut blocks = Vec::new();
        let mut in_channels = config.stem_channels;
        for stage in &config.stages {
            for r in 0..stage.repeats {
                let stride = if r == 0 { stage.stride } else { 1 };
                blocks.push(MbConv::new(
                    in_channels,
                    stage.out_channels,
                    stage,
                    stride,
                    config.se_ratio,
                    device,
                ));
                in_channels = stage.out_channels;
            }
        }

        let head_conv = Conv2dConfig::new([in_channels, tap_channels], [1, 1])
            .with_bias(false)
            .init(device);
        let head_bn = BatchNormConfig::new(tap_channels).init(device);
        let fc = LinearConfig::new(tap_channels, n_outputs).init(device);

        Ok(Self {
            stem,
            stem_bn,
            blocks,
            head_conv,
            head_bn,
            fc,
            tap_channels,
            n_outputs,
        })
    }
}

impl<B: Backend> FeatureTap<B> for EfficientNet<B> {
    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = silu(self.stem_bn.forward(self.stem.forward(x)));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        silu(self.head_bn.forward(self.head_conv.forward(x)))
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(pool_flatten(features))
    }

    fn tap_point(&self) -> TapPoint {
        TapPoint {
            family: BackboneFamily::EfficientNet,
            layer: "head conv-bn-silu activation block",
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

    fn tiny() -> EfficientNetConfig {
        EfficientNetConfig {
            in_channels: 3,
            stem_channels: 8,
            stages: vec![MbStageConfig::new(1, 3, 1, 8, 1), MbStageConfig::new(2, 3, 2, 12, 2)],
            head_channels: 16,
            se_ratio: 0.25,
        }
    }

    #[test]
    fn test_b0_layout() {
        let config = EfficientNetConfig::b0();
        assert_eq!(config.stages.len(), 7);
        assert_eq!(config.stages.iter().map(|s| s.repeats).sum::<usize>(), 16);
        assert_eq!(config.tap_channels().unwrap(), 1280);
    }

    #[test]
    fn test_efficientnet_shapes() {
        let device = Default::default();
        let model: EfficientNet<NdArray> = tiny().init(13, &device).unwrap();

        let x = Tensor::<NdArray, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.features(x.clone()).dims(), [1, 16, 8, 8]);
        assert_eq!(model.forward(x).dims(), [1, 13]);
    }

    #[test]
    fn test_zero_head_has_no_tap() {
        let config = EfficientNetConfig {
            head_channels: 0,
            ..tiny()
        };
        let device = Default::default();
        assert!(matches!(
            config.init::<NdArray>(13, &device),
            Err(RegistryError::NoFeatureTap { .. })
        ));
    }
}
