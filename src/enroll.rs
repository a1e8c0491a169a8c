//! Enrollment: adding and removing reference vectors.
//!
//! Every mutation goes to the catalog first and to the tenant index
//! second, under one write handle. A failed catalog write leaves the index
//! untouched. A failed index write after a successful catalog write marks
//! the index corrupted so the next access rebuilds it from the catalog.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, Tenant};
use crate::embedding::EmbeddingCapability;
use crate::error::{GateError, InputError, NotFoundError, Result};
use crate::index::l2_normalize;
use crate::registry::{CancelToken, TenantIndexRegistry, WriteHandle};
use crate::types::{Embedding, IdentityId, ReferenceId, TenantId};

/// Keeps the catalog and the tenant indexes in step for enrollment.
pub struct EnrollmentCoordinator {
    catalog: Arc<dyn Catalog>,
    registry: Arc<TenantIndexRegistry>,
    capability: Arc<dyn EmbeddingCapability>,
    dimension: usize,
}

impl EnrollmentCoordinator {
    /// Creates a coordinator for vectors of `dimension` values.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: Arc<TenantIndexRegistry>,
        capability: Arc<dyn EmbeddingCapability>,
        dimension: usize,
    ) -> Self {
        Self {
            catalog,
            registry,
            capability,
            dimension,
        }
    }

    /// Enrolls one reference image for an identity.
    ///
    /// The image must contain exactly one face. Returns the id of the
    /// catalog record.
    ///
    /// # Errors
    ///
    /// - `NotFoundError` if the tenant or identity does not exist, or the
    ///   identity belongs to another tenant
    /// - `InputError::NoFaceDetected` / `MultipleFacesDetected`
    /// - `ResourceError` if the model or catalog is unavailable
    #[instrument(skip(self, image, cancel), fields(tenant = %tenant_id, identity = %identity_id))]
    pub fn enroll(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        image: &[u8],
        cancel: &CancelToken,
    ) -> Result<ReferenceId> {
        self.resolve(tenant_id, identity_id)?;
        let vector = self.embed_single(image)?;
        let ids = self.commit(tenant_id, identity_id, vec![vector], cancel)?;
        ids.into_iter()
            .next()
            .ok_or_else(|| GateError::index("enrollment produced no record"))
    }

    /// Enrolls several reference images for an identity in one write.
    ///
    /// Every image is embedded and validated before anything is written.
    /// If a catalog append fails part-way, records already appended by
    /// this call are removed again and the error is returned.
    #[instrument(skip(self, images, cancel), fields(tenant = %tenant_id, identity = %identity_id, images = images.len()))]
    pub fn enroll_references(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        images: &[&[u8]],
        cancel: &CancelToken,
    ) -> Result<Vec<ReferenceId>> {
        self.resolve(tenant_id, identity_id)?;
        let vectors = images
            .iter()
            .map(|image| self.embed_single(image))
            .collect::<Result<Vec<_>>>()?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(tenant_id, identity_id, vectors, cancel)
    }

    /// Enrolls a pre-computed embedding for an identity.
    #[instrument(skip(self, vector, cancel), fields(tenant = %tenant_id, identity = %identity_id))]
    pub fn enroll_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
        cancel: &CancelToken,
    ) -> Result<ReferenceId> {
        self.resolve(tenant_id, identity_id)?;
        let vector = self.prepare(vector)?;
        let ids = self.commit(tenant_id, identity_id, vec![vector], cancel)?;
        ids.into_iter()
            .next()
            .ok_or_else(|| GateError::index("enrollment produced no record"))
    }

    /// Removes one reference vector.
    ///
    /// A failure to update the in-memory index after the catalog delete
    /// is logged and otherwise ignored: the slot dangles until the next
    /// rebuild.
    #[instrument(skip(self), fields(reference = %reference_id))]
    pub fn remove_reference(&self, reference_id: ReferenceId) -> Result<()> {
        let record = self
            .catalog
            .delete_reference_vector(reference_id)?
            .ok_or_else(|| NotFoundError::reference(reference_id))?;

        self.tombstone(record.tenant_id, &[reference_id]);
        info!(tenant = %record.tenant_id, "Reference removed");
        Ok(())
    }

    /// Deletes an identity and all of its reference vectors.
    #[instrument(skip(self), fields(identity = %identity_id))]
    pub fn delete_identity(&self, identity_id: IdentityId) -> Result<()> {
        let identity = self
            .catalog
            .get_identity(identity_id)?
            .ok_or_else(|| NotFoundError::identity(identity_id))?;
        let removed = self
            .catalog
            .delete_identity(identity_id)?
            .ok_or_else(|| NotFoundError::identity(identity_id))?;

        self.tombstone(identity.tenant_id, &removed);
        info!(tenant = %identity.tenant_id, references = removed.len(), "Identity deleted");
        Ok(())
    }

    /// Checks that the tenant exists and owns the identity.
    fn resolve(&self, tenant_id: TenantId, identity_id: IdentityId) -> Result<Tenant> {
        let tenant = self
            .catalog
            .get_tenant(tenant_id)?
            .ok_or_else(|| NotFoundError::tenant(tenant_id))?;
        match self.catalog.get_identity(identity_id)? {
            Some(identity) if identity.tenant_id == tenant_id => Ok(tenant),
            _ => Err(NotFoundError::identity(identity_id).into()),
        }
    }

    /// Embeds a reference image that must contain exactly one face.
    fn embed_single(&self, image: &[u8]) -> Result<Embedding> {
        let mut faces = self.capability.detect_and_embed(image)?;
        match faces.len() {
            0 => Err(InputError::NoFaceDetected.into()),
            1 => {
                let face = faces.remove(0);
                self.prepare(&face.embedding)
            }
            count => Err(InputError::MultipleFacesDetected { count }.into()),
        }
    }

    /// Validates the dimension and L2-normalizes.
    fn prepare(&self, vector: &[f32]) -> Result<Embedding> {
        if vector.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, vector.len()).into());
        }
        l2_normalize(vector).ok_or_else(|| {
            InputError::InvalidVector("vector has zero norm or non-finite values".into()).into()
        })
    }

    /// Appends to the catalog, then inserts into the index, one vector at a
    /// time under a single write handle.
    fn commit(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vectors: Vec<Embedding>,
        cancel: &CancelToken,
    ) -> Result<Vec<ReferenceId>> {
        let handle = self.registry.acquire_write_cancellable(tenant_id, cancel)?;
        let mut appended: Vec<ReferenceId> = Vec::with_capacity(vectors.len());
        let mut corrupted = false;

        for vector in &vectors {
            let record = match self
                .catalog
                .append_reference_vector(tenant_id, identity_id, vector)
            {
                Ok(record) => record,
                Err(err) => {
                    self.roll_back(&handle, &appended, corrupted);
                    return Err(err);
                }
            };
            appended.push(record.id);

            if corrupted {
                continue;
            }
            match handle.insert(record.id, identity_id, vector) {
                Ok(slot) => debug!(reference = %record.id, %slot, "Reference indexed"),
                Err(err) => {
                    handle.mark_corrupted(&format!(
                        "insert of reference {} failed after catalog append: {err}",
                        record.id
                    ));
                    corrupted = true;
                }
            }
        }

        info!(references = appended.len(), "Enrollment committed");
        Ok(appended)
    }

    /// Undoes the appends of a failed batch.
    fn roll_back(&self, handle: &WriteHandle, appended: &[ReferenceId], corrupted: bool) {
        for &reference_id in appended {
            if let Err(err) = self.catalog.delete_reference_vector(reference_id) {
                warn!(reference = %reference_id, error = %err, "Rollback could not delete reference from catalog");
                continue;
            }
            if !corrupted {
                if let Err(err) = handle.remove_reference(reference_id) {
                    warn!(reference = %reference_id, error = %err, "Rollback could not tombstone slot");
                }
            }
        }
        if !appended.is_empty() {
            warn!(rolled_back = appended.len(), "Partial enrollment rolled back");
        }
    }

    /// Tombstones the slots of deleted catalog records if the tenant index
    /// is in memory. Failures leave dangling slots.
    fn tombstone(&self, tenant_id: TenantId, references: &[ReferenceId]) {
        let handle = match self.registry.acquire_write_if_loaded(tenant_id) {
            Ok(Some(handle)) => handle,
            Ok(None) => return,
            Err(err) => {
                warn!(tenant = %tenant_id, error = %err, "Index not updated after catalog delete, slots dangle until rebuild");
                return;
            }
        };

        for &reference_id in references {
            if let Err(err) = handle.remove_reference(reference_id) {
                warn!(reference = %reference_id, error = %err, "Dangling slot until next rebuild");
            }
        }
        match handle.compact_if_needed() {
            Ok(0) => {}
            Ok(reclaimed) => debug!(reclaimed, "Tenant index compacted"),
            Err(err) => warn!(error = %err, "Compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Identity, MemoryCatalog};
    use crate::config::{IndexConfig, RegistryConfig};
    use crate::embedding::{DetectedFace, ModelStatus};
    use crate::registry::IndexState;
    use crate::types::BoundingBox;

    /// Returns one face per byte of input, embedding `[byte, 1, 0, ...]`.
    struct FacePerByte;

    impl EmbeddingCapability for FacePerByte {
        fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
            Ok(image
                .iter()
                .map(|&b| DetectedFace {
                    bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                    confidence: 0.9,
                    embedding: vec![b as f32, 1.0, 0.0, 0.0],
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
        coordinator: EnrollmentCoordinator,
        tenant: TenantId,
        identity: IdentityId,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let tenant = Tenant::new("acme", 4).unwrap();
        catalog.create_tenant(&tenant).unwrap();
        let identity = Identity::new(tenant.id, "John Doe").unwrap();
        catalog.create_identity(&identity).unwrap();

        let registry = Arc::new(TenantIndexRegistry::new(
            catalog.clone() as Arc<dyn Catalog>,
            IndexConfig::default(),
            RegistryConfig::default(),
        ));
        let coordinator = EnrollmentCoordinator::new(
            catalog.clone() as Arc<dyn Catalog>,
            registry.clone(),
            Arc::new(FacePerByte),
            4,
        );
        Fixture {
            catalog,
            registry,
            coordinator,
            tenant: tenant.id,
            identity: identity.id,
        }
    }

    fn indexed(f: &Fixture) -> usize {
        f.registry.acquire_read(f.tenant).unwrap().len().unwrap()
    }

    #[test]
    fn test_enroll_writes_catalog_then_index() {
        let f = fixture();
        let id = f
            .coordinator
            .enroll(f.tenant, f.identity, &[3], &CancelToken::new())
            .unwrap();
        assert!(f.catalog.get_reference(id).unwrap().is_some());
        assert_eq!(indexed(&f), 1);
    }

    #[test]
    fn test_no_face_and_multiple_faces_rejected() {
        let f = fixture();
        let err = f
            .coordinator
            .enroll(f.tenant, f.identity, &[], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, GateError::Input(InputError::NoFaceDetected)));

        let err = f
            .coordinator
            .enroll(f.tenant, f.identity, &[1, 2], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Input(InputError::MultipleFacesDetected { count: 2 })
        ));
        assert_eq!(f.catalog.reference_count(), 0);
        assert_eq!(f.registry.state(f.tenant), IndexState::Unloaded);
    }

    #[test]
    fn test_foreign_identity_rejected() {
        let f = fixture();
        let other = Tenant::new("globex", 4).unwrap();
        f.catalog.create_tenant(&other).unwrap();

        let err = f
            .coordinator
            .enroll_vector(other.id, f.identity, &[1.0, 0.0, 0.0, 0.0], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_catalog_failure_leaves_index_untouched() {
        let f = fixture();
        assert_eq!(indexed(&f), 0);
        f.catalog.fail_next_reference_appends(1);

        let err = f
            .coordinator
            .enroll(f.tenant, f.identity, &[5], &CancelToken::new())
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(indexed(&f), 0);
        assert_eq!(f.catalog.reference_count(), 0);
    }

    #[test]
    fn test_batch_rolls_back_on_partial_failure() {
        let f = fixture();
        let kept = f
            .coordinator
            .enroll(f.tenant, f.identity, &[9], &CancelToken::new())
            .unwrap();

        // Appends 1 and 2 of the batch succeed, 3 fails.
        f.catalog.fail_reference_append_after(2);
        let images: [&[u8]; 3] = [&[1], &[2], &[3]];
        let err = f
            .coordinator
            .enroll_references(f.tenant, f.identity, &images, &CancelToken::new())
            .unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(f.catalog.reference_count(), 1);
        assert_eq!(indexed(&f), 1);
        let refs = f.catalog.list_references(f.identity).unwrap();
        assert_eq!(refs[0].id, kept);
    }

    #[test]
    fn test_batch_enrolls_all() {
        let f = fixture();
        let images: [&[u8]; 3] = [&[1], &[2], &[3]];
        let ids = f
            .coordinator
            .enroll_references(f.tenant, f.identity, &images, &CancelToken::new())
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(indexed(&f), 3);
    }

    #[test]
    fn test_batch_validates_every_image_first() {
        let f = fixture();
        let images: [&[u8]; 2] = [&[1], &[2, 3]];
        let err = f
            .coordinator
            .enroll_references(f.tenant, f.identity, &images, &CancelToken::new())
            .unwrap_err();
        assert!(err.is_input());
        assert_eq!(f.catalog.reference_count(), 0);
    }

    #[test]
    fn test_enroll_vector_checks_dimension_and_norm() {
        let f = fixture();
        let cancel = CancelToken::new();
        assert!(f
            .coordinator
            .enroll_vector(f.tenant, f.identity, &[1.0, 0.0], &cancel)
            .unwrap_err()
            .is_input());
        assert!(f
            .coordinator
            .enroll_vector(f.tenant, f.identity, &[0.0; 4], &cancel)
            .unwrap_err()
            .is_input());
        assert!(f
            .coordinator
            .enroll_vector(f.tenant, f.identity, &[3.0, 4.0, 0.0, 0.0], &cancel)
            .is_ok());
    }

    #[test]
    fn test_remove_reference_tombstones_loaded_index() {
        let f = fixture();
        let id = f
            .coordinator
            .enroll(f.tenant, f.identity, &[3], &CancelToken::new())
            .unwrap();
        assert_eq!(indexed(&f), 1);

        f.coordinator.remove_reference(id).unwrap();
        assert_eq!(indexed(&f), 0);
        assert!(f
            .coordinator
            .remove_reference(id)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_delete_identity_removes_all_slots() {
        let f = fixture();
        let images: [&[u8]; 2] = [&[1], &[2]];
        f.coordinator
            .enroll_references(f.tenant, f.identity, &images, &CancelToken::new())
            .unwrap();
        assert_eq!(indexed(&f), 2);

        f.coordinator.delete_identity(f.identity).unwrap();
        assert_eq!(indexed(&f), 0);
        assert_eq!(f.catalog.reference_count(), 0);
    }
}
