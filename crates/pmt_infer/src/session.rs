//! Exclusive access to a loaded network.
//!
//! An [`InferenceSession`] owns one network on an autodiff backend together
//! with its inference copy. Every forward pass, and every forward plus
//! backward pass of a saliency computation, holds the session lock for its
//! whole duration, so one session can be shared between threads behind an
//! `Arc` without two passes ever interleaving on the same model.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use parking_lot::Mutex;

use pmt_core::PreparedImage;
use pmt_explain::{SaliencyEngine, SaliencyMap};
use pmt_models::{
    load_network, BackboneKind, CheckpointInfo, FeatureTap, InspectionNet, NetworkConfig, TapPoint,
};

use crate::config::ModelSpec;
use crate::error::{InferError, Result};

/// A model that maps one prepared image to a vector of outputs.
pub trait ScoringModel: Send + Sync {
    /// Number of outputs per image.
    fn n_outputs(&self) -> usize;

    /// Plain forward pass without gradient tracking.
    fn forward(&self, image: &PreparedImage) -> Result<Vec<f32>>;
}

/// A scoring model that can also explain one of its outputs.
pub trait ExplainableModel: ScoringModel {
    /// Saliency map of output `target`, from a separate gradient-tracked pass.
    fn explain(&self, image: &PreparedImage, target: usize) -> Result<SaliencyMap>;
}

struct SessionState<B: AutodiffBackend> {
    model: InspectionNet<B>,
    inner: InspectionNet<B::InnerBackend>,
    device: B::Device,
}

/// A network loaded once and shared read-only between requests.
pub struct InferenceSession<B: AutodiffBackend> {
    state: Mutex<SessionState<B>>,
    tap: TapPoint,
    n_outputs: usize,
    engine: SaliencyEngine,
}

impl<B: AutodiffBackend> InferenceSession<B> {
    /// Wrap an already built network.
    pub fn new(model: InspectionNet<B>, device: B::Device) -> Self {
        let inner = model.valid();
        let tap = model.tap_point();
        let n_outputs = model.n_outputs();
        Self {
            state: Mutex::new(SessionState {
                model,
                inner,
                device,
            }),
            tap,
            n_outputs,
            engine: SaliencyEngine::new(),
        }
    }

    /// Build the network for `kind` with `n_outputs` outputs and load
    /// `checkpoint` into it.
    pub fn load(
        kind: BackboneKind,
        n_outputs: usize,
        checkpoint: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<(Self, CheckpointInfo)> {
        let config = NetworkConfig::from_kind(kind, n_outputs);
        let (model, info) = load_network::<B>(&config, checkpoint, device)?;
        tracing::info!(
            arch = kind.name(),
            n_outputs,
            tap = model.tap_point().layer,
            checkpoint = %info.path.display(),
            "Model ready"
        );
        Ok((Self::new(model, device.clone()), info))
    }

    /// Load the model described by `spec`.
    pub fn from_spec(
        spec: &ModelSpec,
        n_outputs: usize,
        device: &B::Device,
    ) -> Result<(Self, CheckpointInfo)> {
        let kind = spec.resolve_kind()?;
        Self::load(kind, n_outputs, &spec.checkpoint, device)
    }

    /// Where saliency is tapped.
    pub fn tap_point(&self) -> TapPoint {
        self.tap
    }
}

impl<B: AutodiffBackend> ScoringModel for InferenceSession<B> {
    fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    fn forward(&self, image: &PreparedImage) -> Result<Vec<f32>> {
        let state = self.state.lock();
        let input = image.to_tensor::<B::InnerBackend>(&state.device);
        let output = state.inner.forward(input);
        let values = output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| InferError::Inference(format!("{e:?}")))?;
        if values.len() != self.n_outputs {
            return Err(InferError::Inference(format!(
                "expected {} outputs, got {}",
                self.n_outputs,
                values.len()
            )));
        }
        Ok(values)
    }
}

impl<B: AutodiffBackend> ExplainableModel for InferenceSession<B> {
    fn explain(&self, image: &PreparedImage, target: usize) -> Result<SaliencyMap> {
        let state = self.state.lock();
        let input = image.to_tensor::<B::InnerBackend>(&state.device);
        let map = self
            .engine
            .compute::<B, _>(&state.model, &state.inner, input, target)?;
        Ok(map)
    }
}
