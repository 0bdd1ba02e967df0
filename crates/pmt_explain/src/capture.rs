//! Activation and gradient capture at the feature tap.

use burn::prelude::*;

use crate::error::{ExplainError, Result};

/// Buffers for one in-flight saliency computation.
///
/// A capture is created for a single call and consumed by
/// [`TapCapture::into_parts`]; nothing outlives the call that filled it.
#[derive(Debug)]
pub struct TapCapture<B: Backend> {
    activation: Option<Tensor<B, 4>>,
    gradient: Option<Tensor<B, 4>>,
}

impl<B: Backend> TapCapture<B> {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self {
            activation: None,
            gradient: None,
        }
    }

    /// Store the forward output of the tap.
    pub fn record_activation(&mut self, activation: Tensor<B, 4>) {
        self.activation = Some(activation);
    }

    /// Store the gradient of the target output with respect to the tap.
    pub fn record_gradient(&mut self, gradient: Tensor<B, 4>) {
        self.gradient = Some(gradient);
    }

    /// Get the captured activation.
    pub fn activation(&self) -> Option<&Tensor<B, 4>> {
        self.activation.as_ref()
    }

    /// Get the captured gradient.
    pub fn gradient(&self) -> Option<&Tensor<B, 4>> {
        self.gradient.as_ref()
    }

    /// Whether both buffers were filled.
    pub fn is_complete(&self) -> bool {
        self.activation.is_some() && self.gradient.is_some()
    }

    /// Consume the capture, returning `(activation, gradient)`.
    ///
    /// # Errors
    ///
    /// [`ExplainError::Instrumentation`] when either buffer is empty or the two
    /// shapes disagree.
    pub fn into_parts(self) -> Result<(Tensor<B, 4>, Tensor<B, 4>)> {
        match (self.activation, self.gradient) {
            (Some(a), Some(g)) => {
                if a.dims() != g.dims() {
                    return Err(ExplainError::Instrumentation(format!(
                        "activation {:?} and gradient {:?} shapes differ",
                        a.dims(),
                        g.dims()
                    )));
                }
                Ok((a, g))
            }
            (None, _) => Err(ExplainError::Instrumentation(
                "feature tap produced no activation".to_string(),
            )),
            (Some(_), None) => Err(ExplainError::Instrumentation(
                "no gradient reached the feature tap".to_string(),
            )),
        }
    }
}

impl<B: Backend> Default for TapCapture<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn test_empty_capture() {
        let capture: TapCapture<NdArray> = TapCapture::new();
        assert!(!capture.is_complete());
        assert!(matches!(
            capture.into_parts(),
            Err(ExplainError::Instrumentation(_))
        ));
    }

    #[test]
    fn test_missing_gradient() {
        let device = Default::default();
        let mut capture: TapCapture<NdArray> = TapCapture::new();
        capture.record_activation(Tensor::zeros([1, 2, 3, 3], &device));
        assert!(capture.activation().is_some());
        let err = capture.into_parts().unwrap_err();
        assert!(err.to_string().contains("gradient"));
    }

    #[test]
    fn test_complete_capture() {
        let device = Default::default();
        let mut capture: TapCapture<NdArray> = TapCapture::new();
        capture.record_activation(Tensor::zeros([1, 2, 3, 3], &device));
        capture.record_gradient(Tensor::ones([1, 2, 3, 3], &device));
        assert!(capture.is_complete());
        let (a, g) = capture.into_parts().unwrap();
        assert_eq!(a.dims(), g.dims());
    }

    #[test]
    fn test_shape_mismatch() {
        let device = Default::default();
        let mut capture: TapCapture<NdArray> = TapCapture::new();
        capture.record_activation(Tensor::zeros([1, 2, 3, 3], &device));
        capture.record_gradient(Tensor::ones([1, 4, 3, 3], &device));
        assert!(capture.into_parts().is_err());
    }
}
