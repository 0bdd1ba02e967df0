//! The feature-tap capability every backbone implements.

use burn::prelude::*;
use serde::Serialize;

use crate::registry::BackboneFamily;

/// Where a model exposes its last spatial feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TapPoint {
    /// Backbone family.
    pub family: BackboneFamily,
    /// Description of the tapped layer.
    pub layer: &'static str,
    /// Channels of the tapped feature map.
    pub channels: usize,
}

/// A model split at its final spatial feature map.
///
/// `features` runs everything up to and including the tapped layer and
/// returns `[batch, channels, height, width]`. `head` runs the rest (global
/// pooling and the fully connected layers). Splitting the forward pass here is
/// what lets saliency code capture activations and their gradients without
/// any hooks on the module tree.
pub trait FeatureTap<B: Backend> {
    /// Backbone up to the tap.
    fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Pooling and fully connected layers after the tap.
    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Location of the tap.
    fn tap_point(&self) -> TapPoint;

    /// Number of outputs produced by [`FeatureTap::head`].
    fn n_outputs(&self) -> usize;

    /// Full forward pass.
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head(self.features(x))
    }
}

/// Global average pool then flatten: `[B, C, H, W] -> [B, C]`.
pub(crate) fn pool_flatten<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, _, _] = x.dims();
    x.mean_dim(3).mean_dim(2).reshape([batch, channels])
}
