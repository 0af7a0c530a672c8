// THEORY:
// The `extractor` module is the seam between this crate and the neural
// feature-extraction model. The engine deliberately does not embed an
// inference runtime; it consumes the model as a single synchronous pure
// function, `tensor -> per-patch feature vectors`. Any backend that satisfies
// the `FeatureExtractor` contract (an ONNX session, a remote service, a mock
// in a test) is substitutable without touching the core algorithms.

use std::sync::Arc;
use thiserror::Error;

/// The spatial dimensions of a model input tensor. Batch size 1 and 3 color
/// channels are implied by the `[1, 3, height, width]` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub height: u32,
    pub width: u32,
}

/// A failure inside the external feature extractor.
///
/// For live frames this is fatal for the current tick only; the pipeline
/// clears its in-flight state and the next eligible tick retries.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExtractorError {
    message: String,
}

impl ExtractorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The opaque boundary to the feature-extraction model.
///
/// `tensor` is the normalized channel-planar image produced by the patch grid
/// mapper. The output is `num_patches * D` floats, row-major by patch, where
/// the feature dimension `D` is determined by the model and discovered by the
/// caller. Implementations must be deterministic for identical input.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, tensor: &[f32], shape: &TensorShape) -> Result<Vec<f32>, ExtractorError>;
}

/// One extractor instance is commonly shared between the registration flow
/// and a live pipeline, so the contract passes through an `Arc`.
impl<T: FeatureExtractor + ?Sized> FeatureExtractor for Arc<T> {
    fn extract(&self, tensor: &[f32], shape: &TensorShape) -> Result<Vec<f32>, ExtractorError> {
        (**self).extract(tensor, shape)
    }
}
