//! Detector + embedder composition with image preprocessing.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{GateError, InputError, Result};
use crate::types::{BoundingBox, Embedding};

use super::{DetectedFace, EmbeddingCapability, ModelStatus};

/// A face box reported by a detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Face location in frame pixel coordinates. May extend past the frame.
    pub bounding_box: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Face detection model.
pub trait FaceDetector: Send + Sync {
    /// Model name for status reporting.
    fn name(&self) -> &str;

    /// Locates faces in a decoded frame.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>>;

    /// Whether the model is loaded and can run.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Face embedding model.
pub trait FaceEmbedder: Send + Sync {
    /// Model name for status reporting.
    fn name(&self) -> &str;

    /// Width and height the model expects its input crop to have.
    fn input_size(&self) -> (u32, u32) {
        (112, 112)
    }

    /// Length of every vector `embed` returns.
    fn dimension(&self) -> usize;

    /// Embeds a face crop already resized to `input_size()`.
    fn embed(&self, face: &DynamicImage) -> Result<Embedding>;

    /// Whether the model is loaded and can run.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Preprocessing settings for [`ModelPipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Detections below this confidence are dropped.
    pub detection_confidence: f32,
    /// Size each crop is resized to before embedding.
    pub face_size: (u32, u32),
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            detection_confidence: 0.7,
            face_size: (112, 112),
        }
    }
}

/// [`EmbeddingCapability`] built from a detector and an embedder.
///
/// For each call: decode the image, detect faces, drop low-confidence
/// detections, crop each box (clamped to the frame; empty crops are
/// skipped), resize to the embedder's input size and embed.
#[derive(Debug)]
pub struct ModelPipeline<D, E> {
    detector: D,
    embedder: E,
    config: PreprocessConfig,
}

impl<D: FaceDetector, E: FaceEmbedder> ModelPipeline<D, E> {
    /// Creates a pipeline resizing crops to the embedder's input size.
    pub fn new(detector: D, embedder: E) -> Self {
        let config = PreprocessConfig {
            face_size: embedder.input_size(),
            ..Default::default()
        };
        Self {
            detector,
            embedder,
            config,
        }
    }

    /// Creates a pipeline with explicit preprocessing settings.
    pub fn with_config(detector: D, embedder: E, config: PreprocessConfig) -> Self {
        Self {
            detector,
            embedder,
            config,
        }
    }

    /// Preprocessing settings in use.
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    fn embed_detection(
        &self,
        image: &DynamicImage,
        detection: &Detection,
    ) -> Result<Option<DetectedFace>> {
        let Some((x, y, width, height)) =
            clamp_to_frame(&detection.bounding_box, image.width(), image.height())
        else {
            debug!(bbox = ?detection.bounding_box, "Face box outside frame, skipping");
            return Ok(None);
        };

        let (face_w, face_h) = self.config.face_size;
        let crop = image
            .crop_imm(x, y, width, height)
            .resize_exact(face_w, face_h, FilterType::Triangle);
        let embedding = self.embedder.embed(&crop)?;
        if embedding.len() != self.embedder.dimension() {
            return Err(GateError::model_unavailable(format!(
                "embedder '{}' returned {} values, expected {}",
                self.embedder.name(),
                embedding.len(),
                self.embedder.dimension()
            )));
        }

        Ok(Some(DetectedFace {
            bounding_box: BoundingBox::new(
                x as f32,
                y as f32,
                (x + width) as f32,
                (y + height) as f32,
            ),
            confidence: detection.confidence,
            embedding,
        }))
    }
}

impl<D: FaceDetector, E: FaceEmbedder> EmbeddingCapability for ModelPipeline<D, E> {
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        if !self.detector.is_ready() || !self.embedder.is_ready() {
            return Err(GateError::model_unavailable("face models are not loaded"));
        }

        let frame = image::load_from_memory(image)
            .map_err(|e| InputError::InvalidImage(e.to_string()))?;
        let detections = self.detector.detect(&frame)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections
            .iter()
            .filter(|d| d.confidence >= self.config.detection_confidence)
        {
            if let Some(face) = self.embed_detection(&frame, detection)? {
                faces.push(face);
            }
        }

        debug!(
            detected = detections.len(),
            embedded = faces.len(),
            "Faces processed"
        );
        Ok(faces)
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn status(&self) -> ModelStatus {
        ModelStatus {
            detector: self.detector.name().to_string(),
            embedder: self.embedder.name().to_string(),
            dimension: self.embedder.dimension(),
            ready: self.detector.is_ready() && self.embedder.is_ready(),
        }
    }
}

/// Clamps a box to the frame, returning `(x, y, width, height)` in whole
/// pixels, or `None` if nothing of it lies inside.
fn clamp_to_frame(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if ![bbox.x1, bbox.y1, bbox.x2, bbox.y2]
        .iter()
        .all(|v| v.is_finite())
    {
        return None;
    }
    let x1 = bbox.x1.max(0.0).min(width as f32) as u32;
    let y1 = bbox.y1.max(0.0).min(height as f32) as u32;
    let x2 = bbox.x2.max(0.0).min(width as f32) as u32;
    let y2 = bbox.y2.max(0.0).min(height as f32) as u32;
    if x2 > x1 && y2 > y1 {
        Some((x1, y1, x2 - x1, y2 - y1))
    } else {
        None
    }
}
