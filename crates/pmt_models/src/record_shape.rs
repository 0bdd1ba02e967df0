//! Structural comparison of a decoded network record against the record of
//! the configured network.
//!
//! Burn copies parameters into a module without looking at their shapes and
//! panics when a `Vec` of submodules has a different length, so every record
//! read from disk is checked here before it is loaded.

use burn::module::Param;
use burn::nn::conv::Conv2dRecord;
use burn::nn::{BatchNormRecord, LinearRecord};
use burn::prelude::*;

use crate::checkpoint::{CheckpointError, Result};
use crate::cnn::{
    BasicBlockRecord, ConvBlockRecord, CustomCnnRecord, EfficientNetRecord, MbConvRecord,
    ResNetRecord, ResNetStageRecord,
};
use crate::network::InspectionNetRecord;

/// A record whose tensor shapes can be compared with a reference record.
pub(crate) trait RecordShape {
    /// Check that `self` has the layout of `expected`. `at` names the
    /// position of `self` inside the network, for error messages.
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()>;
}

fn mismatch(at: &str, detail: String) -> CheckpointError {
    CheckpointError::Shape {
        at: at.to_string(),
        detail,
    }
}

impl<B: Backend, const D: usize> RecordShape for Param<Tensor<B, D>> {
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
        let found = self.val().dims();
        let wanted = expected.val().dims();
        if found != wanted {
            return Err(mismatch(at, format!("expected {wanted:?}, found {found:?}")));
        }
        Ok(())
    }
}

impl<T: RecordShape> RecordShape for Vec<T> {
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
        if self.len() != expected.len() {
            return Err(mismatch(
                at,
                format!("expected {} entries, found {}", expected.len(), self.len()),
            ));
        }
        self.iter()
            .zip(expected)
            .enumerate()
            .try_for_each(|(i, (found, wanted))| found.check_shape(wanted, &format!("{at}.{i}")))
    }
}

impl<T: RecordShape> RecordShape for Option<T> {
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
        match (self, expected) {
            (Some(found), Some(wanted)) => found.check_shape(wanted, at),
            (None, None) => Ok(()),
            (Some(_), None) => Err(mismatch(at, "unexpected entry".to_string())),
            (None, Some(_)) => Err(mismatch(at, "missing entry".to_string())),
        }
    }
}

impl<B: Backend, const D: usize> RecordShape for BatchNormRecord<B, D> {
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
        self.gamma.check_shape(&expected.gamma, &format!("{at}.gamma"))?;
        self.beta.check_shape(&expected.beta, &format!("{at}.beta"))
    }
}

macro_rules! record_shape {
    ($record:ident { $($field:ident),+ $(,)? }) => {
        impl<B: Backend> RecordShape for $record<B> {
            fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
                $(
                    self.$field.check_shape(
                        &expected.$field,
                        &format!("{at}.{}", stringify!($field)),
                    )?;
                )+
                Ok(())
            }
        }
    };
}

record_shape!(Conv2dRecord { weight, bias });
record_shape!(LinearRecord { weight, bias });
record_shape!(ConvBlockRecord { conv1, bn1, conv2, bn2 });
record_shape!(CustomCnnRecord { blocks, fc1, fc2 });
record_shape!(BasicBlockRecord { conv1, bn1, conv2, bn2, shortcut, shortcut_bn });
record_shape!(ResNetStageRecord { blocks });
record_shape!(ResNetRecord { stem_conv, stem_bn, stages, fc });
record_shape!(MbConvRecord {
    expand,
    expand_bn,
    depthwise,
    depthwise_bn,
    se_reduce,
    se_expand,
    project,
    project_bn,
});
record_shape!(EfficientNetRecord { stem, stem_bn, blocks, head_conv, head_bn, fc });

impl<B: Backend> RecordShape for InspectionNetRecord<B> {
    fn check_shape(&self, expected: &Self, at: &str) -> Result<()> {
        match (self, expected) {
            (Self::CustomCnn(found), Self::CustomCnn(wanted)) => found.check_shape(wanted, at),
            (Self::ResNet(found), Self::ResNet(wanted)) => found.check_shape(wanted, at),
            (Self::EfficientNet(found), Self::EfficientNet(wanted)) => {
                found.check_shape(wanted, at)
            }
            _ => Err(mismatch(at, "different backbone family".to_string())),
        }
    }
}

/// Width of the output layer stored in `record`.
pub(crate) fn record_outputs<B: Backend>(record: &InspectionNetRecord<B>) -> usize {
    let head = match record {
        InspectionNetRecord::CustomCnn(r) => &r.fc2,
        InspectionNetRecord::ResNet(r) => &r.fc,
        InspectionNetRecord::EfficientNet(r) => &r.fc,
    };
    head.weight.val().dims()[1]
}
