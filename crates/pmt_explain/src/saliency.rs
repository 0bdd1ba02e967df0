//! Gradient-weighted class activation maps.

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::Serialize;

use pmt_models::FeatureTap;

use crate::capture::TapCapture;
use crate::error::{ExplainError, Result};

/// Guards min-max scaling of a constant map.
pub const NORMALIZE_EPSILON: f32 = 1e-8;

/// Single-channel importance map at feature-tap resolution, scaled to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaliencyMap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl SaliencyMap {
    /// Build a map from raw row-major values, min-max scaling them.
    ///
    /// # Errors
    ///
    /// [`ExplainError::Shape`] when the map is empty or `values` does not hold
    /// `width * height` elements.
    pub fn from_raw(width: usize, height: usize, mut values: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ExplainError::Shape(format!(
                "saliency map must be non-empty, got {width}x{height}"
            )));
        }
        if values.len() != width * height {
            return Err(ExplainError::Shape(format!(
                "expected {} values for a {width}x{height} map, got {}",
                width * height,
                values.len()
            )));
        }
        normalize(&mut values);
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Read a `[1, 1, H, W]` map back from the device and scale it.
    pub fn from_tensor<B: Backend>(cam: Tensor<B, 4>) -> Result<Self> {
        let [batch, channels, height, width] = cam.dims();
        if batch != 1 || channels != 1 {
            return Err(ExplainError::Shape(format!(
                "expected a [1, 1, H, W] map, got {:?}",
                [batch, channels, height, width]
            )));
        }
        let values = cam
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ExplainError::Tensor(format!("{e:?}")))?;
        Self::from_raw(width, height, values)
    }

    /// Width in cells.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in cells.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y * self.width + x).copied()
    }

    /// Largest value.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Largest absolute difference to another map of the same shape.
    pub fn max_abs_diff(&self, other: &SaliencyMap) -> Option<f32> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}

/// Min-max scale `values` into [0, 1] in place.
///
/// A non-constant map reaches exactly 1.0 at its maximum. A constant map
/// (including the all-zero map of a vanishing gradient) becomes all zeros.
/// Non-finite entries are treated as zero.
pub fn normalize(values: &mut [f32]) {
    for v in values.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    if values.is_empty() {
        return;
    }
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let denom = if range > NORMALIZE_EPSILON {
        range
    } else {
        range + NORMALIZE_EPSILON
    };
    for v in values.iter_mut() {
        *v = ((*v - min) / denom).clamp(0.0, 1.0);
    }
}

/// Combine tap activations with their gradients.
///
/// # Arguments
///
/// * `activations` - Tap output (batch, channels, h, w)
/// * `gradients` - Gradient of the target w.r.t. the tap (batch, channels, h, w)
///
/// # Returns
///
/// Rectified map of shape (batch, 1, h, w), not yet scaled.
pub fn grad_cam<B: Backend>(activations: Tensor<B, 4>, gradients: Tensor<B, 4>) -> Tensor<B, 4> {
    // Channel weights: spatial mean of the gradient, (batch, channels, 1, 1)
    let weights = gradients.mean_dim(3).mean_dim(2);

    let cam = (activations * weights).sum_dim(1);

    // Positive evidence only
    cam.clamp_min(0.0)
}

/// Computes saliency maps for one target output of a model.
///
/// Each call runs the backbone on the inference copy of the model (the
/// caller keeps it alongside the autodiff model), detaches the tap activation into a fresh gradient-tracked leaf, runs the head on the
/// autodiff model and backpropagates the single selected output. Batch norm
/// therefore always sees inference statistics, and the gradient graph of one
/// call is dropped before the next starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaliencyEngine;

impl SaliencyEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }

    /// Compute the saliency map of output `target` for a single-image batch.
    ///
    /// `inner` must be `model.valid()`; it is passed in so the inference copy
    /// is built once per loaded model rather than once per call.
    ///
    /// # Errors
    ///
    /// - [`ExplainError::InvalidTarget`] if `target` is not an output index
    /// - [`ExplainError::Shape`] if `input` is not a batch of one
    /// - [`ExplainError::Instrumentation`] if the tap received no gradient
    pub fn compute<B, M>(
        &self,
        model: &M,
        inner: &M::InnerModule,
        input: Tensor<B::InnerBackend, 4>,
        target: usize,
    ) -> Result<SaliencyMap>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + FeatureTap<B>,
        M::InnerModule: FeatureTap<B::InnerBackend>,
    {
        let n_outputs = model.n_outputs();
        if target >= n_outputs {
            return Err(ExplainError::InvalidTarget { target, n_outputs });
        }
        let [batch, _, _, _] = input.dims();
        if batch != 1 {
            return Err(ExplainError::Shape(format!(
                "saliency needs a single-image batch, got {batch}"
            )));
        }

        let mut capture = TapCapture::<B::InnerBackend>::new();

        let activation = inner.features(input);
        capture.record_activation(activation.clone());

        let tap = Tensor::<B, 4>::from_inner(activation).require_grad();
        let output = model.head(tap.clone());
        let score = output.slice([0..1, target..target + 1]).sum();
        let grads = score.backward();

        if let Some(gradient) = tap.grad(&grads) {
            capture.record_gradient(gradient);
        }

        let (activation, gradient) = capture.into_parts()?;
        let map = SaliencyMap::from_tensor(grad_cam(activation, gradient))?;
        tracing::trace!(
            target_index = target,
            width = map.width(),
            height = map.height(),
            "Computed saliency map"
        );
        Ok(map)
    }
}
