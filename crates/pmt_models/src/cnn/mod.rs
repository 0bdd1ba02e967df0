//! Convolutional backbones for RGB inspection images.

mod custom;
mod efficientnet;
mod resnet;

pub use custom::{ConvBlock, ConvBlockRecord, CustomCnn, CustomCnnConfig, CustomCnnRecord};
pub use efficientnet::{
    EfficientNet, EfficientNetConfig, EfficientNetRecord, MbConv, MbConvRecord, MbStageConfig,
};
pub use resnet::{
    BasicBlock, BasicBlockRecord, ResNet, ResNetConfig, ResNetRecord, ResNetStage,
    ResNetStageRecord,
};
