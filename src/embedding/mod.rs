//! Face detection and embedding abstractions for FaceGate.
//!
//! The neural detector and embedder are external collaborators. FaceGate
//! only sees them through [`EmbeddingCapability`]: image bytes go in, a list
//! of located faces with fixed-dimension vectors comes out.
//!
//! # Providers
//!
//! - [`ModelPipeline`] - Composes a [`FaceDetector`] and a [`FaceEmbedder`]
//!   with image decoding, cropping and resizing
//! - [`ExternalEmbedding`] - For deployments that compute embeddings
//!   elsewhere and only use the vector APIs
//!
//! Normalization is not the capability's job: the enrollment and
//! identification paths L2-normalize every vector they receive.
//!
//! # Example
//!
//! ```rust
//! use facegate::embedding::{EmbeddingCapability, ExternalEmbedding};
//!
//! let capability = ExternalEmbedding::new(128);
//! assert_eq!(capability.dimension(), 128);
//! assert!(!capability.status().ready);
//! assert!(capability.detect_and_embed(b"not an image").is_err());
//! ```

mod pipeline;

pub use pipeline::{Detection, FaceDetector, FaceEmbedder, ModelPipeline, PreprocessConfig};

use serde::{Deserialize, Serialize};

use crate::error::{GateError, InputError, Result};
use crate::types::{BoundingBox, Embedding};

/// One face located in an image, with its raw (unnormalized) embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    /// Face location in frame pixel coordinates.
    pub bounding_box: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Embedding vector of length `dimension()`.
    pub embedding: Embedding,
}

/// Readiness report for the detection/embedding capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Detector model name.
    pub detector: String,
    /// Embedder model name.
    pub embedder: String,
    /// Embedding dimension.
    pub dimension: usize,
    /// Whether `detect_and_embed` can currently run.
    pub ready: bool,
}

/// Face detection and embedding capability.
///
/// Implementations must be thread-safe (`Send + Sync`): identification
/// requests call the capability concurrently. A call is treated as a
/// blocking external operation; FaceGate never interrupts it.
///
/// # Implementing a Custom Provider
///
/// ```rust,ignore
/// use facegate::embedding::{DetectedFace, EmbeddingCapability, ModelStatus};
/// use facegate::Result;
///
/// struct RemoteModel {
///     client: InferenceClient,
/// }
///
/// impl EmbeddingCapability for RemoteModel {
///     fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
///         self.client.faces(image)
///     }
///
///     fn dimension(&self) -> usize {
///         512
///     }
///
///     fn status(&self) -> ModelStatus {
///         self.client.status()
///     }
/// }
/// ```
pub trait EmbeddingCapability: Send + Sync {
    /// Detects every face in an encoded image and embeds each one.
    ///
    /// Returns an empty list when the image contains no face.
    ///
    /// # Errors
    ///
    /// - `InputError::InvalidImage` if the bytes cannot be decoded
    /// - `ResourceError::ModelUnavailable` if the capability cannot run
    fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>>;

    /// Returns the dimension of every embedding this capability produces.
    fn dimension(&self) -> usize;

    /// Reports model names and readiness.
    fn status(&self) -> ModelStatus;

    /// Validates that an embedding has the capability's dimension.
    ///
    /// # Errors
    ///
    /// Returns `InputError::DimensionMismatch` if dimensions don't match.
    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.dimension();
        if embedding.len() != expected {
            return Err(InputError::dimension_mismatch(expected, embedding.len()).into());
        }
        Ok(())
    }
}

/// Capability for embeddings computed outside FaceGate.
///
/// It knows the expected dimension but cannot process images: every
/// `detect_and_embed` call fails with `ModelUnavailable`. Use the
/// `enroll_vector` path with it.
#[derive(Clone, Debug)]
pub struct ExternalEmbedding {
    dimension: usize,
}

impl ExternalEmbedding {
    /// Creates an external provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingCapability for ExternalEmbedding {
    fn detect_and_embed(&self, _image: &[u8]) -> Result<Vec<DetectedFace>> {
        Err(GateError::model_unavailable(
            "External embedding mode: embeddings must be provided by the caller",
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn status(&self) -> ModelStatus {
        ModelStatus {
            detector: "external".to_string(),
            embedder: "external".to_string(),
            dimension: self.dimension,
            ready: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;

    #[test]
    fn test_external_embedding_dimension() {
        let capability = ExternalEmbedding::new(512);
        assert_eq!(capability.dimension(), 512);
        assert_eq!(capability.status().dimension, 512);
    }

    #[test]
    fn test_external_embedding_is_model_unavailable() {
        let capability = ExternalEmbedding::new(128);
        let err = capability.detect_and_embed(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            GateError::Resource(ResourceError::ModelUnavailable(_))
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validate_embedding() {
        let capability = ExternalEmbedding::new(3);
        assert!(capability.validate_embedding(&[1.0, 0.0, 0.0]).is_ok());
        assert!(capability.validate_embedding(&[1.0, 0.0]).unwrap_err().is_input());
    }

    #[test]
    fn test_external_embedding_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExternalEmbedding>();
    }
}
