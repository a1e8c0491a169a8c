//! Persistent catalog: the durable source of truth.
//!
//! The catalog maps tenant → identity → reference vectors and tenant →
//! camera, and stores the access log. Tenant indexes are derived from it
//! and can always be rebuilt from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FaceGate                                │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │      Catalog        │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                    ▲         ▲                              │
//! │                    │         │                              │
//! │         ┌─────────┴─┐   ┌───┴───────────┐                  │
//! │         │RedbCatalog│   │ MemoryCatalog │                  │
//! │         └───────────┘   └───────────────┘                  │
//! │           (durable)      (in-process, fault injection)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating call is one serializable transaction and is durable
//! when it returns.

mod memory;
pub mod redb;
pub mod schema;
mod types;

pub use self::memory::MemoryCatalog;
pub use self::redb::RedbCatalog;
pub use schema::{CatalogMetadata, SCHEMA_VERSION};
pub use types::{
    normalize_tenant_name, validate_name, Camera, CameraRole, Identity, ReferenceRecord,
    StoredVector, Tenant, MAX_NAME_LENGTH,
};

use std::path::Path;

use crate::access::AccessLogEntry;
use crate::error::Result;
use crate::types::{CameraId, IdentityId, ReferenceId, TenantId, Timestamp};

/// Persistent catalog trait.
///
/// The primary implementation is [`RedbCatalog`]. [`MemoryCatalog`] keeps
/// everything in process and can simulate outages.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the catalog is shared by every
/// request thread and handles its own synchronization.
///
/// # Errors
///
/// Transaction failures are reported as
/// [`ResourceError::CatalogUnavailable`](crate::ResourceError::CatalogUnavailable):
/// the call had no effect and may be retried.
pub trait Catalog: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the path to the catalog file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Tenants
    // =========================================================================

    /// Returns true if the tenant exists.
    fn tenant_exists(&self, id: TenantId) -> Result<bool>;

    /// Stores a new tenant.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if another tenant has the same name.
    fn create_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Retrieves a tenant by ID.
    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>>;

    /// Retrieves a tenant by its (normalized) name.
    fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>>;

    /// Lists all tenants in creation order.
    fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Overwrites an existing tenant record (the name is immutable).
    ///
    /// # Errors
    ///
    /// `NotFound` if the tenant does not exist.
    fn update_tenant(&self, tenant: &Tenant) -> Result<()>;

    /// Deletes a tenant with its identities, reference vectors and cameras.
    ///
    /// Access log history is kept. Returns `true` if the tenant existed.
    fn delete_tenant(&self, id: TenantId) -> Result<bool>;

    // =========================================================================
    // Identities
    // =========================================================================

    /// Stores a new identity.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the tenant does not exist
    /// - `AlreadyExists` if the tenant already has an identity with this name
    fn create_identity(&self, identity: &Identity) -> Result<()>;

    /// Retrieves an identity by ID.
    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>>;

    /// Lists a tenant's identities in creation order.
    fn list_identities(&self, tenant_id: TenantId) -> Result<Vec<Identity>>;

    /// Deletes an identity and all its reference vectors.
    ///
    /// Returns the deleted reference ids, or `None` if the identity did
    /// not exist.
    fn delete_identity(&self, id: IdentityId) -> Result<Option<Vec<ReferenceId>>>;

    // =========================================================================
    // Reference vectors
    // =========================================================================

    /// Loads every reference vector of a tenant, ordered by record id
    /// (enrollment order).
    fn load_tenant_vectors(&self, tenant_id: TenantId) -> Result<Vec<StoredVector>>;

    /// Appends a reference vector for an identity.
    ///
    /// # Errors
    ///
    /// `NotFound` if the identity does not exist or belongs to another
    /// tenant.
    fn append_reference_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<ReferenceRecord>;

    /// Retrieves reference metadata by record id.
    fn get_reference(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>>;

    /// Lists an identity's reference records in enrollment order.
    fn list_references(&self, identity_id: IdentityId) -> Result<Vec<ReferenceRecord>>;

    /// Deletes a reference vector.
    ///
    /// Returns the deleted record, or `None` if it did not exist.
    fn delete_reference_vector(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>>;

    // =========================================================================
    // Cameras
    // =========================================================================

    /// Stores a new camera.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the tenant does not exist
    /// - `AlreadyExists` if (tenant, gate, role) is taken
    fn register_camera(&self, camera: &Camera) -> Result<()>;

    /// Retrieves a camera by ID.
    fn get_camera(&self, id: CameraId) -> Result<Option<Camera>>;

    /// Lists a tenant's cameras in registration order.
    fn list_cameras(&self, tenant_id: TenantId) -> Result<Vec<Camera>>;

    /// Deletes a camera. Access log entries referencing it are kept.
    fn delete_camera(&self, id: CameraId) -> Result<bool>;

    // =========================================================================
    // Access log
    // =========================================================================

    /// Appends an access log entry.
    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<()>;

    /// Lists a tenant's access log entries at or after `since`, oldest
    /// first, at most `limit` entries.
    fn list_access_log(
        &self,
        tenant_id: TenantId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>>;
}

/// Encodes a vector as little-endian f32 bytes.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decodes little-endian f32 bytes.
pub(crate) fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
