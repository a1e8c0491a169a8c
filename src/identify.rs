//! Identification: frame in, matched identities and access log entries out.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::access::{AccessLogEntry, AccessLogFeed};
use crate::catalog::Catalog;
use crate::config::TenantSettings;
use crate::embedding::EmbeddingCapability;
use crate::error::{GateError, NotFoundError, Result};
use crate::index::{l2_normalize, SearchHit};
use crate::registry::{CancelToken, TenantIndexRegistry};
use crate::types::{
    AccessLogId, BoundingBox, CameraId, IdentityId, ReferenceId, TenantId, Timestamp,
};

/// A nearest reference vector for one face.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identity owning the reference vector.
    pub identity_id: IdentityId,
    /// Catalog record of the reference vector.
    pub reference_id: ReferenceId,
    /// Cosine similarity to the face.
    pub similarity: f32,
}

impl From<SearchHit> for Candidate {
    fn from(hit: SearchHit) -> Self {
        Self {
            identity_id: hit.identity_id,
            reference_id: hit.reference_id,
            similarity: hit.similarity,
        }
    }
}

/// Outcome for one face in the frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Face location in the frame.
    pub bounding_box: BoundingBox,
    /// Matched identity, `None` when the best similarity is below the
    /// tenant threshold or the tenant has no reference vectors.
    pub identity_id: Option<IdentityId>,
    /// Similarity of the best candidate, 0.0 without candidates.
    pub similarity: f32,
    /// Up to `top_k` candidates, most similar first.
    pub candidates: Vec<Candidate>,
    /// Access log entry recorded for this face.
    pub access_log_id: AccessLogId,
}

impl FaceMatch {
    /// Returns true if the face was matched to an identity.
    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Result of one identification call.
///
/// An empty `faces` list means no face was detected. A non-empty list
/// whose faces are all unmatched means faces were seen but nobody was
/// recognized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    /// Tenant searched.
    pub tenant_id: TenantId,
    /// Camera that captured the frame.
    pub camera_id: CameraId,
    /// One entry per processed face, in detector order.
    pub faces: Vec<FaceMatch>,
    /// Wall-clock time from detection through index release.
    pub processing_time_ms: f64,
}

impl Identification {
    /// Faces matched to an identity.
    pub fn matches(&self) -> impl Iterator<Item = &FaceMatch> {
        self.faces.iter().filter(|f| f.is_match())
    }

    /// Returns true if no face was detected.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Runs detection, search and thresholding for identify requests.
pub struct IdentificationPipeline {
    catalog: Arc<dyn Catalog>,
    registry: Arc<TenantIndexRegistry>,
    capability: Arc<dyn EmbeddingCapability>,
    feed: Arc<AccessLogFeed>,
    defaults: TenantSettings,
}

impl IdentificationPipeline {
    /// Creates a pipeline applying `defaults` to tenants without their own
    /// settings.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: Arc<TenantIndexRegistry>,
        capability: Arc<dyn EmbeddingCapability>,
        feed: Arc<AccessLogFeed>,
        defaults: TenantSettings,
    ) -> Self {
        Self {
            catalog,
            registry,
            capability,
            feed,
            defaults,
        }
    }

    /// Identifies every face in a frame captured by `camera_id`.
    ///
    /// Each processed face produces one persisted access log entry, matched
    /// or not. A frame without faces produces no entries.
    ///
    /// # Errors
    ///
    /// - `NotFoundError` if the tenant does not exist, or the camera does
    ///   not exist or belongs to another tenant
    /// - `InputError::InvalidImage` for undecodable bytes
    /// - `ResourceError` if the model or catalog is unavailable, including a
    ///   failed access log append
    #[instrument(skip(self, image, cancel), fields(tenant = %tenant_id, camera = %camera_id))]
    pub fn identify(
        &self,
        tenant_id: TenantId,
        camera_id: CameraId,
        image: &[u8],
        cancel: &CancelToken,
    ) -> Result<Identification> {
        let tenant = self
            .catalog
            .get_tenant(tenant_id)?
            .ok_or_else(|| NotFoundError::tenant(tenant_id))?;
        match self.catalog.get_camera(camera_id)? {
            Some(camera) if camera.tenant_id == tenant_id => {}
            _ => return Err(NotFoundError::camera(camera_id).into()),
        }
        let settings = tenant.effective_settings(&self.defaults);

        let started = Instant::now();
        let detected = self.capability.detect_and_embed(image)?;
        if detected.is_empty() {
            debug!("No face detected");
            return Ok(Identification {
                tenant_id,
                camera_id,
                faces: Vec::new(),
                processing_time_ms: elapsed_ms(started),
            });
        }

        let dimension = self.capability.dimension();
        let mut queries = Vec::with_capacity(detected.len());
        for face in detected {
            if face.embedding.len() != dimension {
                return Err(GateError::model_unavailable(format!(
                    "capability returned {} values, expected {}",
                    face.embedding.len(),
                    dimension
                )));
            }
            match l2_normalize(&face.embedding) {
                Some(query) => queries.push((face.bounding_box, query)),
                None => warn!(bbox = ?face.bounding_box, "Face embedding has zero norm, skipping"),
            }
        }

        let results = {
            let handle = self.registry.acquire_read_cancellable(tenant_id, cancel)?;
            queries
                .iter()
                .map(|(_, query)| handle.search(query, settings.top_k))
                .collect::<Result<Vec<_>>>()?
        };
        let processing_time_ms = elapsed_ms(started);
        let timestamp = Timestamp::now();

        let mut faces = Vec::with_capacity(queries.len());
        for ((bounding_box, _), hits) in queries.into_iter().zip(results) {
            let best = hits.first().copied();
            let similarity = best.map_or(0.0, |hit| hit.similarity);
            let identity_id = best
                .filter(|hit| hit.similarity >= settings.similarity_threshold)
                .map(|hit| hit.identity_id);

            let entry = AccessLogEntry {
                id: AccessLogId::new(),
                tenant_id,
                camera_id,
                identity_id,
                similarity,
                processing_time_ms,
                bounding_box,
                timestamp,
            };
            self.catalog.append_access_log(&entry)?;
            self.feed.publish(&entry);

            faces.push(FaceMatch {
                bounding_box,
                identity_id,
                similarity,
                candidates: hits.into_iter().map(Candidate::from).collect(),
                access_log_id: entry.id,
            });
        }

        debug!(
            faces = faces.len(),
            matched = faces.iter().filter(|f| f.is_match()).count(),
            processing_time_ms,
            "Identification complete"
        );
        Ok(Identification {
            tenant_id,
            camera_id,
            faces,
            processing_time_ms,
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Camera, CameraRole, Identity, MemoryCatalog, Tenant};
    use crate::config::{IndexConfig, RegistryConfig};
    use crate::embedding::{DetectedFace, ModelStatus};
    use crate::error::InputError;

    /// Interprets each 4-byte group of the input as one face embedding.
    struct BytesAsFaces;

    impl EmbeddingCapability for BytesAsFaces {
        fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
            Ok(image
                .chunks(4)
                .enumerate()
                .map(|(i, chunk)| DetectedFace {
                    bounding_box: BoundingBox::new(
                        i as f32 * 10.0,
                        0.0,
                        i as f32 * 10.0 + 8.0,
                        8.0,
                    ),
                    confidence: 0.9,
                    embedding: chunk.iter().map(|&b| b as f32).collect(),
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn status(&self) -> ModelStatus {
            ModelStatus {
                detector: "bytes".into(),
                embedder: "bytes".into(),
                dimension: 4,
                ready: true,
            }
        }
    }

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        registry: Arc<TenantIndexRegistry>,
        feed: Arc<AccessLogFeed>,
        pipeline: IdentificationPipeline,
        tenant: TenantId,
        camera: CameraId,
        john: IdentityId,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let tenant = Tenant::new("acme", 4).unwrap();
        catalog.create_tenant(&tenant).unwrap();
        let camera = Camera::new(tenant.id, "north", CameraRole::Entry, None).unwrap();
        catalog.register_camera(&camera).unwrap();
        let john = Identity::new(tenant.id, "John Doe").unwrap();
        catalog.create_identity(&john).unwrap();
        catalog
            .append_reference_vector(tenant.id, john.id, &[1.0, 0.0, 0.0, 0.0])
            .unwrap();

        let registry = Arc::new(TenantIndexRegistry::new(
            catalog.clone() as Arc<dyn Catalog>,
            IndexConfig::default(),
            RegistryConfig::default(),
        ));
        let feed = Arc::new(AccessLogFeed::new());
        let pipeline = IdentificationPipeline::new(
            catalog.clone() as Arc<dyn Catalog>,
            registry.clone(),
            Arc::new(BytesAsFaces),
            feed.clone(),
            TenantSettings::default(),
        );
        Fixture {
            catalog,
            registry,
            feed,
            pipeline,
            tenant: tenant.id,
            camera: camera.id,
            john: john.id,
        }
    }

    #[test]
    fn test_match_above_threshold() {
        let f = fixture();
        let rx = f.feed.subscribe(4);
        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[9, 0, 0, 0], &CancelToken::new())
            .unwrap();

        assert_eq!(result.faces.len(), 1);
        let face = &result.faces[0];
        assert_eq!(face.identity_id, Some(f.john));
        assert!((face.similarity - 1.0).abs() < 1e-5);

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.id, face.access_log_id);
        assert_eq!(entry.identity_id, Some(f.john));
        assert_eq!(f.catalog.list_access_log(f.tenant, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_below_threshold_is_logged_unmatched() {
        let f = fixture();
        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[1, 1, 0, 0], &CancelToken::new())
            .unwrap();

        let face = &result.faces[0];
        assert_eq!(face.identity_id, None);
        assert!(face.similarity > 0.7 && face.similarity < 0.8);
        assert_eq!(face.candidates.len(), 1);

        let log = f.catalog.list_access_log(f.tenant, None, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert!(!log[0].is_match());
    }

    #[test]
    fn test_no_face_logs_nothing() {
        let f = fixture();
        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[], &CancelToken::new())
            .unwrap();
        assert!(result.is_empty());
        assert!(f.catalog.list_access_log(f.tenant, None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_multiple_faces_each_logged() {
        let f = fixture();
        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[5, 0, 0, 0, 0, 0, 5, 0], &CancelToken::new())
            .unwrap();
        assert_eq!(result.faces.len(), 2);
        assert_eq!(result.matches().count(), 1);
        assert_eq!(f.catalog.list_access_log(f.tenant, None, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_camera_rejected() {
        let f = fixture();
        let other = Tenant::new("globex", 4).unwrap();
        f.catalog.create_tenant(&other).unwrap();

        let err = f
            .pipeline
            .identify(other.id, f.camera, &[1, 0, 0, 0], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_zero_norm_face_skipped() {
        let f = fixture();
        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[0, 0, 0, 0, 7, 0, 0, 0], &CancelToken::new())
            .unwrap();
        assert_eq!(result.faces.len(), 1);
        assert!(result.faces[0].is_match());
    }

    #[test]
    fn test_wrong_dimension_from_model() {
        let f = fixture();
        let err = f
            .pipeline
            .identify(f.tenant, f.camera, &[1, 0], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_resource());
        assert!(!matches!(err, GateError::Input(InputError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_access_log_failure_aborts() {
        let f = fixture();
        f.catalog.fail_next_access_log_appends(1);
        let err = f
            .pipeline
            .identify(f.tenant, f.camera, &[1, 0, 0, 0], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_per_tenant_threshold() {
        let f = fixture();
        let mut tenant = f.catalog.get_tenant(f.tenant).unwrap().unwrap();
        tenant.settings = Some(TenantSettings {
            similarity_threshold: 0.5,
            top_k: 1,
        });
        f.catalog.update_tenant(&tenant).unwrap();

        let result = f
            .pipeline
            .identify(f.tenant, f.camera, &[1, 1, 0, 0], &CancelToken::new())
            .unwrap();
        assert_eq!(result.faces[0].identity_id, Some(f.john));
    }

    #[test]
    fn test_read_handle_released() {
        let f = fixture();
        f.pipeline
            .identify(f.tenant, f.camera, &[1, 0, 0, 0], &CancelToken::new())
            .unwrap();
        assert_eq!(
            f.registry.state(f.tenant),
            crate::registry::IndexState::Ready
        );
    }
}
