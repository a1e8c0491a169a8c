//! FaceGate main struct and lifecycle operations.
//!
//! The [`FaceGate`] struct is the primary interface. It owns the catalog,
//! the tenant index registry, the enrollment coordinator and the
//! identification pipeline, and provides methods for:
//!
//! - Opening and closing the catalog
//! - Administering tenants, identities and cameras
//! - Enrolling and removing reference faces
//! - Identifying faces in camera frames
//! - Inspecting and maintaining tenant indexes
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use facegate::{CameraRole, Config, FaceGate};
//!
//! let gate = FaceGate::open("./facegate.db", Config::default(), Arc::new(my_models))?;
//!
//! let acme = gate.create_tenant("Acme")?;
//! let john = gate.create_identity(acme, "John Doe")?;
//! let lobby = gate.register_camera(acme, "lobby", CameraRole::Entry, None)?;
//!
//! gate.enroll_reference(acme, john, &portrait_jpeg)?;
//! let result = gate.identify(acme, lobby, &frame_jpeg)?;
//!
//! gate.close()?;
//! ```
//!
//! # Thread Safety
//!
//! `FaceGate` is `Send + Sync` and can be shared across threads using
//! `Arc`. Identifications against one tenant run concurrently; an
//! enrollment waits for them and excludes them while it writes.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{info, instrument};

use crate::access::{AccessLogEntry, AccessLogFeed};
use crate::catalog::{
    normalize_tenant_name, validate_name, Camera, CameraRole, Catalog, Identity, RedbCatalog,
    ReferenceRecord, Tenant,
};
use crate::config::{Config, TenantSettings};
use crate::embedding::{EmbeddingCapability, ModelStatus};
use crate::enroll::EnrollmentCoordinator;
use crate::error::{GateError, InputError, NotFoundError, Result};
use crate::identify::{Identification, IdentificationPipeline};
use crate::index::IndexStats;
use crate::registry::{CancelToken, IndexState, TenantIndexRegistry};
use crate::types::{CameraId, IdentityId, ReferenceId, TenantId, Timestamp};

/// References to the catalog held by one FaceGate: the gate, its
/// registry, its enrollment coordinator and its identification pipeline.
const CATALOG_OWNERS: usize = 4;

/// The main FaceGate handle.
///
/// Create an instance with [`FaceGate::open()`] (durable redb catalog) or
/// [`FaceGate::with_catalog()`] (any [`Catalog`]), and close it with
/// [`FaceGate::close()`].
pub struct FaceGate {
    catalog: Arc<dyn Catalog>,
    capability: Arc<dyn EmbeddingCapability>,
    registry: Arc<TenantIndexRegistry>,
    enrollment: EnrollmentCoordinator,
    identification: IdentificationPipeline,
    feed: Arc<AccessLogFeed>,
    config: Config,
}

impl std::fmt::Debug for FaceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceGate")
            .field("config", &self.config)
            .field("catalog_path", &self.catalog.path())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl FaceGate {
    /// Opens or creates a FaceGate catalog at the specified path.
    ///
    /// If the catalog exists, its stored embedding dimension must match
    /// the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - The capability's dimension differs from the configured one
    /// - Catalog file is corrupted or locked by another process
    /// - Schema version or embedding dimension doesn't match
    #[instrument(skip(path, config, capability), fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        config: Config,
        capability: Arc<dyn EmbeddingCapability>,
    ) -> Result<Self> {
        config.validate().map_err(GateError::from)?;
        check_capability(&config, capability.as_ref())?;

        let catalog = RedbCatalog::open(&path, &config)?;
        Self::with_catalog(Arc::new(catalog), config, capability)
    }

    /// Creates a FaceGate over an already opened catalog.
    pub fn with_catalog(
        catalog: Arc<dyn Catalog>,
        config: Config,
        capability: Arc<dyn EmbeddingCapability>,
    ) -> Result<Self> {
        config.validate().map_err(GateError::from)?;
        check_capability(&config, capability.as_ref())?;

        let registry = Arc::new(TenantIndexRegistry::new(
            Arc::clone(&catalog),
            config.index.clone(),
            config.registry.clone(),
        ));
        let feed = Arc::new(AccessLogFeed::new());
        let enrollment = EnrollmentCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&capability),
            config.dimension(),
        );
        let identification = IdentificationPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&capability),
            Arc::clone(&feed),
            config.tenant_defaults,
        );

        let status = capability.status();
        info!(
            dimension = config.dimension(),
            detector = %status.detector,
            embedder = %status.embedder,
            ready = status.ready,
            "FaceGate opened"
        );

        Ok(Self {
            catalog,
            capability,
            registry,
            enrollment,
            identification,
            feed,
            config,
        })
    }

    /// Closes FaceGate, dropping every in-memory index.
    ///
    /// Nothing is flushed here: every catalog write is already committed
    /// with the configured [`SyncMode`](crate::SyncMode) when its call
    /// returns. The catalog file itself is released when the last
    /// `Arc<dyn Catalog>` is dropped, so a catalog passed to
    /// [`with_catalog`](Self::with_catalog) stays open while the caller
    /// keeps a clone. An [`AsyncFaceGate`](crate::AsyncFaceGate) shares the
    /// gate through an `Arc`; recover it with `Arc::try_unwrap` before
    /// closing.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        let shared = Arc::strong_count(&self.catalog) > CATALOG_OWNERS;
        info!(
            loaded = self.registry.loaded_tenants().len(),
            "Closing FaceGate"
        );
        drop(self);
        if shared {
            info!("FaceGate closed; catalog still referenced elsewhere");
        } else {
            info!("FaceGate closed");
        }
        Ok(())
    }

    /// Configuration used to open this instance.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Embedding dimension of every reference vector.
    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.config.dimension()
    }

    /// Catalog file path, if the catalog is file-backed.
    pub fn catalog_path(&self) -> Option<&Path> {
        self.catalog.path()
    }

    /// Detection/embedding model readiness.
    pub fn model_status(&self) -> ModelStatus {
        self.capability.status()
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    /// Creates a tenant. The name is trimmed and lowercased and must be
    /// unique.
    #[instrument(skip(self))]
    pub fn create_tenant(&self, name: &str) -> Result<TenantId> {
        let tenant = Tenant::new(name, self.config.dimension())?;
        self.catalog.create_tenant(&tenant)?;
        info!(tenant = %tenant.id, name = %tenant.name, "Tenant created");
        Ok(tenant.id)
    }

    /// Gets a tenant by id.
    pub fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        self.catalog.get_tenant(id)
    }

    /// Finds a tenant by name (case-insensitive).
    pub fn find_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        self.catalog.find_tenant_by_name(&normalize_tenant_name(name)?)
    }

    /// Lists every tenant.
    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.catalog.list_tenants()
    }

    /// Settings in effect for a tenant.
    pub fn tenant_settings(&self, id: TenantId) -> Result<TenantSettings> {
        Ok(self
            .require_tenant(id)?
            .effective_settings(&self.config.tenant_defaults))
    }

    /// Overrides a tenant's identification settings. Applies to
    /// identifications started afterwards.
    #[instrument(skip(self))]
    pub fn update_tenant_settings(&self, id: TenantId, settings: TenantSettings) -> Result<()> {
        settings.validate()?;
        let mut tenant = self.require_tenant(id)?;
        tenant.settings = Some(settings);
        self.catalog.update_tenant(&tenant)?;
        info!(tenant = %id, threshold = settings.similarity_threshold, top_k = settings.top_k, "Tenant settings updated");
        Ok(())
    }

    /// Deletes a tenant with its identities, reference vectors and
    /// cameras. Access log history is kept.
    #[instrument(skip(self))]
    pub fn delete_tenant(&self, id: TenantId) -> Result<()> {
        if !self.catalog.delete_tenant(id)? {
            return Err(NotFoundError::tenant(id).into());
        }
        self.registry.invalidate(id)?;
        info!(tenant = %id, "Tenant deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------

    /// Creates an identity. The name must be unique within the tenant.
    #[instrument(skip(self))]
    pub fn create_identity(&self, tenant_id: TenantId, full_name: &str) -> Result<IdentityId> {
        self.require_tenant(tenant_id)?;
        let identity = Identity::new(tenant_id, full_name)?;
        self.catalog.create_identity(&identity)?;
        info!(tenant = %tenant_id, identity = %identity.id, "Identity created");
        Ok(identity.id)
    }

    /// Gets an identity by id.
    pub fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        self.catalog.get_identity(id)
    }

    /// Finds an identity of a tenant by exact name.
    pub fn find_identity(&self, tenant_id: TenantId, full_name: &str) -> Result<Option<Identity>> {
        let name = validate_name("full_name", full_name)?;
        Ok(self
            .list_identities(tenant_id)?
            .into_iter()
            .find(|identity| identity.full_name == name))
    }

    /// Lists a tenant's identities.
    pub fn list_identities(&self, tenant_id: TenantId) -> Result<Vec<Identity>> {
        self.require_tenant(tenant_id)?;
        self.catalog.list_identities(tenant_id)
    }

    /// Lists an identity's reference vectors in enrollment order.
    pub fn list_references(&self, identity_id: IdentityId) -> Result<Vec<ReferenceRecord>> {
        if self.catalog.get_identity(identity_id)?.is_none() {
            return Err(NotFoundError::identity(identity_id).into());
        }
        self.catalog.list_references(identity_id)
    }

    /// Deletes an identity and removes its vectors from the live index.
    pub fn delete_identity(&self, id: IdentityId) -> Result<()> {
        self.enrollment.delete_identity(id)
    }

    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    /// Registers a camera, unique per (tenant, gate, role).
    #[instrument(skip(self, location))]
    pub fn register_camera(
        &self,
        tenant_id: TenantId,
        gate: &str,
        role: CameraRole,
        location: Option<&str>,
    ) -> Result<CameraId> {
        self.require_tenant(tenant_id)?;
        let camera = Camera::new(tenant_id, gate, role, location)?;
        self.catalog.register_camera(&camera)?;
        info!(tenant = %tenant_id, camera = %camera.id, "Camera registered");
        Ok(camera.id)
    }

    /// Gets a camera by id.
    pub fn get_camera(&self, id: CameraId) -> Result<Option<Camera>> {
        self.catalog.get_camera(id)
    }

    /// Lists a tenant's cameras.
    pub fn list_cameras(&self, tenant_id: TenantId) -> Result<Vec<Camera>> {
        self.require_tenant(tenant_id)?;
        self.catalog.list_cameras(tenant_id)
    }

    /// Deletes a camera. Its access log history is kept.
    pub fn delete_camera(&self, id: CameraId) -> Result<()> {
        if !self.catalog.delete_camera(id)? {
            return Err(NotFoundError::camera(id).into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------

    /// Enrolls a reference image containing exactly one face.
    pub fn enroll_reference(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        image: &[u8],
    ) -> Result<ReferenceId> {
        self.enroll_reference_cancellable(tenant_id, identity_id, image, &CancelToken::new())
    }

    /// Like [`enroll_reference`](Self::enroll_reference), abandoning a
    /// pending index wait once `cancel` is set.
    pub fn enroll_reference_cancellable(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        image: &[u8],
        cancel: &CancelToken,
    ) -> Result<ReferenceId> {
        self.enrollment.enroll(tenant_id, identity_id, image, cancel)
    }

    /// Enrolls several reference images in one write; all or nothing for
    /// catalog failures.
    pub fn enroll_references(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        images: &[&[u8]],
    ) -> Result<Vec<ReferenceId>> {
        self.enrollment
            .enroll_references(tenant_id, identity_id, images, &CancelToken::new())
    }

    /// Enrolls a pre-computed embedding.
    pub fn enroll_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<ReferenceId> {
        self.enroll_vector_cancellable(tenant_id, identity_id, vector, &CancelToken::new())
    }

    /// Like [`enroll_vector`](Self::enroll_vector), abandoning a pending
    /// index wait once `cancel` is set.
    pub fn enroll_vector_cancellable(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
        cancel: &CancelToken,
    ) -> Result<ReferenceId> {
        self.enrollment
            .enroll_vector(tenant_id, identity_id, vector, cancel)
    }

    /// Removes one reference vector.
    pub fn remove_reference(&self, reference_id: ReferenceId) -> Result<()> {
        self.enrollment.remove_reference(reference_id)
    }

    // ------------------------------------------------------------------
    // Identification
    // ------------------------------------------------------------------

    /// Identifies every face in a frame from `camera_id`.
    pub fn identify(
        &self,
        tenant_id: TenantId,
        camera_id: CameraId,
        image: &[u8],
    ) -> Result<Identification> {
        self.identify_cancellable(tenant_id, camera_id, image, &CancelToken::new())
    }

    /// Like [`identify`](Self::identify), abandoning a pending index wait
    /// once `cancel` is set.
    pub fn identify_cancellable(
        &self,
        tenant_id: TenantId,
        camera_id: CameraId,
        image: &[u8],
        cancel: &CancelToken,
    ) -> Result<Identification> {
        self.identification
            .identify(tenant_id, camera_id, image, cancel)
    }

    // ------------------------------------------------------------------
    // Access log
    // ------------------------------------------------------------------

    /// Lists a tenant's access log in timestamp order, starting at `since`.
    pub fn access_log(
        &self,
        tenant_id: TenantId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>> {
        self.catalog.list_access_log(tenant_id, since, limit)
    }

    /// Subscribes to access log entries as they are recorded.
    ///
    /// A subscriber that falls more than `capacity` entries behind misses
    /// entries; identification never waits for it.
    pub fn subscribe_access_log(&self, capacity: usize) -> Receiver<AccessLogEntry> {
        self.feed.subscribe(capacity)
    }

    // ------------------------------------------------------------------
    // Index maintenance
    // ------------------------------------------------------------------

    /// Rebuilds a tenant's index from the catalog.
    pub fn rebuild_index(&self, tenant_id: TenantId) -> Result<IndexStats> {
        self.registry.rebuild(tenant_id)
    }

    /// Statistics of a tenant's index, loading it if needed.
    pub fn index_stats(&self, tenant_id: TenantId) -> Result<IndexStats> {
        self.registry.acquire_read(tenant_id)?.stats()
    }

    /// Lifecycle state of a tenant's index.
    pub fn index_state(&self, tenant_id: TenantId) -> IndexState {
        self.registry.state(tenant_id)
    }

    /// Drops a tenant's index from memory. Fails with `TenantBusy` while
    /// handles are outstanding.
    pub fn evict(&self, tenant_id: TenantId) -> Result<bool> {
        self.registry.evict(tenant_id)
    }

    /// Evicts indexes idle for longer than the configured period.
    pub fn evict_idle(&self) -> usize {
        self.registry.evict_idle()
    }

    fn require_tenant(&self, id: TenantId) -> Result<Tenant> {
        self.catalog
            .get_tenant(id)?
            .ok_or_else(|| NotFoundError::tenant(id).into())
    }
}

fn check_capability(config: &Config, capability: &dyn EmbeddingCapability) -> Result<()> {
    if capability.dimension() != config.dimension() {
        return Err(GateError::Input(InputError::dimension_mismatch(
            config.dimension(),
            capability.dimension(),
        )));
    }
    Ok(())
}
