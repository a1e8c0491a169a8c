//! redb catalog implementation.
//!
//! This module provides the durable catalog backend for FaceGate using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//!
//! Each catalog operation runs in its own transaction, so every mutation
//! is atomic and durable (per [`SyncMode`]) when it returns.

use std::path::{Path, PathBuf};

use ::redb::{
    Database, DatabaseError, Durability, ReadableMultimapTable, ReadableTable, WriteTransaction,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::access::AccessLogEntry;
use crate::config::{Config, EmbeddingDimension, SyncMode};
use crate::error::{GateError, InputError, NotFoundError, Result, StorageError};
use crate::types::{CameraId, IdentityId, ReferenceId, TenantId, Timestamp};

use super::schema::{
    access_log_key, access_log_range, identity_name_key, CatalogMetadata, ACCESS_LOG_TABLE,
    CAMERAS_BY_TENANT_TABLE, CAMERAS_TABLE, IDENTITIES_BY_TENANT_TABLE, IDENTITIES_TABLE,
    IDENTITY_NAMES_TABLE, METADATA_TABLE, REFERENCES_BY_IDENTITY_TABLE,
    REFERENCES_BY_TENANT_TABLE, REFERENCES_TABLE, SCHEMA_VERSION, TENANTS_TABLE,
    TENANT_NAMES_TABLE, VECTORS_TABLE,
};
use super::{
    decode_vector, encode_vector, Camera, Catalog, Identity, ReferenceRecord, StoredVector,
    Tenant,
};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "catalog_metadata";

/// redb catalog wrapper.
///
/// This struct holds the redb database handle and cached metadata.
///
/// # Thread Safety
///
/// `RedbCatalog` is `Send + Sync`. redb handles internal synchronization
/// using MVCC for readers and exclusive locking for writers.
#[derive(Debug)]
pub struct RedbCatalog {
    /// The redb database handle.
    db: Database,

    /// Cached catalog metadata.
    metadata: CatalogMetadata,

    /// Path to the catalog file.
    path: PathBuf,

    /// Durability applied to every write transaction.
    sync_mode: SyncMode,
}

impl RedbCatalog {
    /// Opens or creates a catalog at the given path.
    ///
    /// If the catalog doesn't exist, it will be created and initialized
    /// with the configuration settings. If it exists, the configuration
    /// will be validated against the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The catalog file is corrupted
    /// - The catalog is locked by another process
    /// - Schema version doesn't match
    /// - Embedding dimension doesn't match (for existing catalogs)
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.exists();

        debug!(exists = exists, "Opening catalog");

        let db = Self::create_database(path, config)?;

        if exists {
            Self::open_existing(db, path.to_path_buf(), config)
        } else {
            Self::initialize_new(db, path.to_path_buf(), config)
        }
    }

    /// Creates the redb database with appropriate settings.
    fn create_database(path: &Path, config: &Config) -> Result<Database> {
        let mut db = Database::builder().create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => GateError::Storage(StorageError::DatabaseLocked),
            other => GateError::from(other),
        })?;

        if config.sync_mode.is_paranoid() {
            let clean = db.check_integrity()?;
            if !clean {
                warn!("Catalog integrity check repaired the database file");
            }
        }

        debug!("Catalog file opened successfully");
        Ok(db)
    }

    /// Initializes a new catalog with tables and metadata.
    #[instrument(skip(db, path, config), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Initializing new catalog");

        let metadata = CatalogMetadata::new(config.embedding_dimension);

        // Create all tables and write metadata in a single transaction
        let write_txn = db.begin_write()?;
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;

            let _ = write_txn.open_table(TENANTS_TABLE)?;
            let _ = write_txn.open_table(TENANT_NAMES_TABLE)?;
            let _ = write_txn.open_table(IDENTITIES_TABLE)?;
            let _ = write_txn.open_table(IDENTITY_NAMES_TABLE)?;
            let _ = write_txn.open_table(REFERENCES_TABLE)?;
            let _ = write_txn.open_table(VECTORS_TABLE)?;
            let _ = write_txn.open_table(CAMERAS_TABLE)?;
            let _ = write_txn.open_table(ACCESS_LOG_TABLE)?;
            let _ = write_txn.open_multimap_table(IDENTITIES_BY_TENANT_TABLE)?;
            let _ = write_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
            let _ = write_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;
            let _ = write_txn.open_multimap_table(CAMERAS_BY_TENANT_TABLE)?;
        }
        write_txn.commit()?;

        info!(
            schema_version = SCHEMA_VERSION,
            dimension = config.embedding_dimension.size(),
            "Catalog initialized"
        );

        Ok(Self {
            db,
            metadata,
            path,
            sync_mode: config.sync_mode,
        })
    }

    /// Opens and validates an existing catalog.
    #[instrument(skip(db, path, config), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Opening existing catalog");

        let read_txn = db.begin_read()?;
        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)?
                .ok_or_else(|| StorageError::corrupted("Missing catalog metadata"))?;

            bincode::deserialize::<CatalogMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };
        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Schema version mismatch"
            );
            return Err(GateError::Storage(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }));
        }

        if metadata.embedding_dimension != config.embedding_dimension {
            warn!(
                expected = config.embedding_dimension.size(),
                found = metadata.embedding_dimension.size(),
                "Embedding dimension mismatch"
            );
            return Err(InputError::dimension_mismatch(
                config.embedding_dimension.size(),
                metadata.embedding_dimension.size(),
            )
            .into());
        }

        let mut metadata = metadata;
        metadata.touch();

        let write_txn = db.begin_write()?;
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;
        }
        write_txn.commit()?;

        info!(
            schema_version = metadata.schema_version,
            dimension = metadata.embedding_dimension.size(),
            "Catalog opened successfully"
        );

        Ok(Self {
            db,
            metadata,
            path,
            sync_mode: config.sync_mode,
        })
    }

    /// Returns the catalog metadata.
    pub fn metadata(&self) -> &CatalogMetadata {
        &self.metadata
    }

    /// Returns the embedding dimension configured for this catalog.
    #[inline]
    pub fn embedding_dimension(&self) -> EmbeddingDimension {
        self.metadata.embedding_dimension
    }

    /// Returns a reference to the underlying redb database.
    #[inline]
    #[allow(dead_code)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Begins a write transaction with the configured durability.
    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(match self.sync_mode {
            SyncMode::Fast => Durability::Eventual,
            SyncMode::Normal | SyncMode::Paranoid => Durability::Immediate,
        });
        Ok(txn)
    }
}

/// Deserializes a bincode record.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Collects the values stored under one multimap key.
fn ids_in<T>(table: &T, key: &[u8; 16]) -> Result<Vec<[u8; 16]>>
where
    T: ReadableMultimapTable<&'static [u8; 16], &'static [u8; 16]>,
{
    let mut ids = Vec::new();
    for value in table.get(key)? {
        ids.push(*value?.value());
    }
    Ok(ids)
}

impl Catalog for RedbCatalog {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    fn tenant_exists(&self, id: TenantId) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TENANTS_TABLE)?;
        Ok(table.get(id.as_bytes())?.is_some())
    }

    fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let bytes = bincode::serialize(tenant)?;

        let write_txn = self.begin_write()?;
        {
            let mut names = write_txn.open_table(TENANT_NAMES_TABLE)?;
            if names.get(tenant.name.as_str())?.is_some() {
                return Err(InputError::already_exists(format!("tenant '{}'", tenant.name)).into());
            }
            names.insert(tenant.name.as_str(), tenant.id.as_bytes())?;

            let mut tenants = write_txn.open_table(TENANTS_TABLE)?;
            tenants.insert(tenant.id.as_bytes(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %tenant.id, name = %tenant.name, "Tenant created");
        Ok(())
    }

    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TENANTS_TABLE)?;

        match table.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        let read_txn = self.db.begin_read()?;
        let names = read_txn.open_table(TENANT_NAMES_TABLE)?;
        let id = match names.get(name)? {
            Some(value) => *value.value(),
            None => return Ok(None),
        };

        let tenants = read_txn.open_table(TENANTS_TABLE)?;
        match tenants.get(&id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Err(StorageError::corrupted(format!("dangling tenant name '{}'", name)).into()),
        }
    }

    fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TENANTS_TABLE)?;

        let mut tenants = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            tenants.push(decode(value.value())?);
        }
        Ok(tenants)
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        let bytes = bincode::serialize(tenant)?;

        let write_txn = self.begin_write()?;
        {
            let mut tenants = write_txn.open_table(TENANTS_TABLE)?;
            let existing: Tenant = match tenants.get(tenant.id.as_bytes())? {
                Some(value) => decode(value.value())?,
                None => return Err(NotFoundError::tenant(tenant.id).into()),
            };
            if existing.name != tenant.name {
                return Err(InputError::invalid_field("name", "tenant names are immutable").into());
            }
            tenants.insert(tenant.id.as_bytes(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %tenant.id, "Tenant updated");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_tenant(&self, id: TenantId) -> Result<bool> {
        let write_txn = self.begin_write()?;
        {
            let mut tenants = write_txn.open_table(TENANTS_TABLE)?;
            let tenant: Tenant = match tenants.remove(id.as_bytes())? {
                Some(value) => decode(value.value())?,
                None => return Ok(false),
            };
            let mut names = write_txn.open_table(TENANT_NAMES_TABLE)?;
            names.remove(tenant.name.as_str())?;

            // Identities
            let mut identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let mut identity_names = write_txn.open_table(IDENTITY_NAMES_TABLE)?;
            let mut identities_by_tenant = write_txn.open_multimap_table(IDENTITIES_BY_TENANT_TABLE)?;
            let mut refs_by_identity = write_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;
            for identity_id in ids_in(&identities_by_tenant, id.as_bytes())? {
                let identity: Option<Identity> = match identities.remove(&identity_id)? {
                    Some(value) => Some(decode(value.value())?),
                    None => None,
                };
                if let Some(identity) = identity {
                    let key = identity_name_key(id, &identity.full_name);
                    identity_names.remove(key.as_slice())?;
                }
                refs_by_identity.remove_all(&identity_id)?;
            }
            identities_by_tenant.remove_all(id.as_bytes())?;

            // Reference vectors
            let mut references = write_txn.open_table(REFERENCES_TABLE)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut refs_by_tenant = write_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
            for reference_id in ids_in(&refs_by_tenant, id.as_bytes())? {
                references.remove(&reference_id)?;
                vectors.remove(&reference_id)?;
            }
            refs_by_tenant.remove_all(id.as_bytes())?;

            // Cameras
            let mut cameras = write_txn.open_table(CAMERAS_TABLE)?;
            let mut cameras_by_tenant = write_txn.open_multimap_table(CAMERAS_BY_TENANT_TABLE)?;
            for camera_id in ids_in(&cameras_by_tenant, id.as_bytes())? {
                cameras.remove(&camera_id)?;
            }
            cameras_by_tenant.remove_all(id.as_bytes())?;
        }
        write_txn.commit()?;

        info!(tenant = %id, "Tenant deleted");
        Ok(true)
    }

    // =========================================================================
    // Identities
    // =========================================================================

    fn create_identity(&self, identity: &Identity) -> Result<()> {
        let bytes = bincode::serialize(identity)?;
        let name_key = identity_name_key(identity.tenant_id, &identity.full_name);

        let write_txn = self.begin_write()?;
        {
            let tenants = write_txn.open_table(TENANTS_TABLE)?;
            if tenants.get(identity.tenant_id.as_bytes())?.is_none() {
                return Err(NotFoundError::tenant(identity.tenant_id).into());
            }

            let mut names = write_txn.open_table(IDENTITY_NAMES_TABLE)?;
            if names.get(name_key.as_slice())?.is_some() {
                return Err(InputError::already_exists(format!(
                    "identity '{}'",
                    identity.full_name
                ))
                .into());
            }
            names.insert(name_key.as_slice(), identity.id.as_bytes())?;

            let mut identities = write_txn.open_table(IDENTITIES_TABLE)?;
            identities.insert(identity.id.as_bytes(), bytes.as_slice())?;

            let mut by_tenant = write_txn.open_multimap_table(IDENTITIES_BY_TENANT_TABLE)?;
            by_tenant.insert(identity.tenant_id.as_bytes(), identity.id.as_bytes())?;
        }
        write_txn.commit()?;

        debug!(id = %identity.id, tenant = %identity.tenant_id, "Identity created");
        Ok(())
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;

        match table.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_identities(&self, tenant_id: TenantId) -> Result<Vec<Identity>> {
        let read_txn = self.db.begin_read()?;
        let by_tenant = read_txn.open_multimap_table(IDENTITIES_BY_TENANT_TABLE)?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;

        let mut identities = Vec::new();
        for id in ids_in(&by_tenant, tenant_id.as_bytes())? {
            if let Some(value) = table.get(&id)? {
                identities.push(decode(value.value())?);
            }
        }
        Ok(identities)
    }

    fn delete_identity(&self, id: IdentityId) -> Result<Option<Vec<ReferenceId>>> {
        let write_txn = self.begin_write()?;
        let removed;
        {
            let mut identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let identity: Identity = match identities.remove(id.as_bytes())? {
                Some(value) => decode(value.value())?,
                None => return Ok(None),
            };

            let mut names = write_txn.open_table(IDENTITY_NAMES_TABLE)?;
            let name_key = identity_name_key(identity.tenant_id, &identity.full_name);
            names.remove(name_key.as_slice())?;

            let mut by_tenant = write_txn.open_multimap_table(IDENTITIES_BY_TENANT_TABLE)?;
            by_tenant.remove(identity.tenant_id.as_bytes(), id.as_bytes())?;

            let mut references = write_txn.open_table(REFERENCES_TABLE)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            let mut refs_by_tenant = write_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
            let mut refs_by_identity = write_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;

            let reference_ids = ids_in(&refs_by_identity, id.as_bytes())?;
            for reference_id in &reference_ids {
                references.remove(reference_id)?;
                vectors.remove(reference_id)?;
                refs_by_tenant.remove(identity.tenant_id.as_bytes(), reference_id)?;
            }
            refs_by_identity.remove_all(id.as_bytes())?;

            removed = reference_ids
                .into_iter()
                .map(ReferenceId::from_bytes)
                .collect::<Vec<_>>();
        }
        write_txn.commit()?;

        debug!(identity = %id, references = removed.len(), "Identity deleted");
        Ok(Some(removed))
    }

    // =========================================================================
    // Reference vectors
    // =========================================================================

    fn load_tenant_vectors(&self, tenant_id: TenantId) -> Result<Vec<StoredVector>> {
        let read_txn = self.db.begin_read()?;
        let by_tenant = read_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
        let references = read_txn.open_table(REFERENCES_TABLE)?;
        let vectors = read_txn.open_table(VECTORS_TABLE)?;

        let mut loaded = Vec::new();
        for id in ids_in(&by_tenant, tenant_id.as_bytes())? {
            let record: ReferenceRecord = match references.get(&id)? {
                Some(value) => decode(value.value())?,
                None => {
                    return Err(StorageError::corrupted(format!(
                        "missing reference record {}",
                        ReferenceId::from_bytes(id)
                    ))
                    .into())
                }
            };
            let vector = vectors
                .get(&id)?
                .and_then(|value| decode_vector(value.value()))
                .ok_or_else(|| {
                    StorageError::corrupted(format!("missing or malformed vector {}", record.id))
                })?;
            loaded.push(StoredVector {
                reference_id: record.id,
                identity_id: record.identity_id,
                vector,
            });
        }

        debug!(tenant = %tenant_id, count = loaded.len(), "Loaded tenant vectors");
        Ok(loaded)
    }

    fn append_reference_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<ReferenceRecord> {
        let expected = self.metadata.embedding_dimension.size();
        if vector.len() != expected {
            return Err(InputError::dimension_mismatch(expected, vector.len()).into());
        }

        let record = ReferenceRecord {
            id: ReferenceId::new(),
            tenant_id,
            identity_id,
            dimension: vector.len(),
            enrolled_at: Timestamp::now(),
        };
        let bytes = bincode::serialize(&record)?;
        let vector_bytes = encode_vector(vector);

        let write_txn = self.begin_write()?;
        {
            let identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let identity: Option<Identity> = match identities.get(identity_id.as_bytes())? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };
            if !identity.is_some_and(|i| i.tenant_id == tenant_id) {
                return Err(NotFoundError::identity(identity_id).into());
            }

            let mut references = write_txn.open_table(REFERENCES_TABLE)?;
            references.insert(record.id.as_bytes(), bytes.as_slice())?;

            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            vectors.insert(record.id.as_bytes(), vector_bytes.as_slice())?;

            let mut by_tenant = write_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
            by_tenant.insert(tenant_id.as_bytes(), record.id.as_bytes())?;

            let mut by_identity = write_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;
            by_identity.insert(identity_id.as_bytes(), record.id.as_bytes())?;
        }
        write_txn.commit()?;

        debug!(reference = %record.id, identity = %identity_id, "Reference vector appended");
        Ok(record)
    }

    fn get_reference(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REFERENCES_TABLE)?;

        match table.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_references(&self, identity_id: IdentityId) -> Result<Vec<ReferenceRecord>> {
        let read_txn = self.db.begin_read()?;
        let by_identity = read_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;
        let table = read_txn.open_table(REFERENCES_TABLE)?;

        let mut records = Vec::new();
        for id in ids_in(&by_identity, identity_id.as_bytes())? {
            if let Some(value) = table.get(&id)? {
                records.push(decode(value.value())?);
            }
        }
        Ok(records)
    }

    fn delete_reference_vector(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>> {
        let write_txn = self.begin_write()?;
        let record: ReferenceRecord;
        {
            let mut references = write_txn.open_table(REFERENCES_TABLE)?;
            record = match references.remove(id.as_bytes())? {
                Some(value) => decode(value.value())?,
                None => return Ok(None),
            };

            let mut vectors = write_txn.open_table(VECTORS_TABLE)?;
            vectors.remove(id.as_bytes())?;

            let mut by_tenant = write_txn.open_multimap_table(REFERENCES_BY_TENANT_TABLE)?;
            by_tenant.remove(record.tenant_id.as_bytes(), id.as_bytes())?;

            let mut by_identity = write_txn.open_multimap_table(REFERENCES_BY_IDENTITY_TABLE)?;
            by_identity.remove(record.identity_id.as_bytes(), id.as_bytes())?;
        }
        write_txn.commit()?;

        debug!(reference = %id, "Reference vector deleted");
        Ok(Some(record))
    }

    // =========================================================================
    // Cameras
    // =========================================================================

    fn register_camera(&self, camera: &Camera) -> Result<()> {
        let bytes = bincode::serialize(camera)?;

        let write_txn = self.begin_write()?;
        {
            let tenants = write_txn.open_table(TENANTS_TABLE)?;
            if tenants.get(camera.tenant_id.as_bytes())?.is_none() {
                return Err(NotFoundError::tenant(camera.tenant_id).into());
            }

            let mut cameras = write_txn.open_table(CAMERAS_TABLE)?;
            let mut by_tenant = write_txn.open_multimap_table(CAMERAS_BY_TENANT_TABLE)?;
            for id in ids_in(&by_tenant, camera.tenant_id.as_bytes())? {
                let existing: Option<Camera> = match cameras.get(&id)? {
                    Some(value) => Some(decode(value.value())?),
                    None => None,
                };
                if existing.is_some_and(|c| c.gate == camera.gate && c.role == camera.role) {
                    return Err(InputError::already_exists(format!(
                        "camera for gate '{}' ({})",
                        camera.gate, camera.role
                    ))
                    .into());
                }
            }

            cameras.insert(camera.id.as_bytes(), bytes.as_slice())?;
            by_tenant.insert(camera.tenant_id.as_bytes(), camera.id.as_bytes())?;
        }
        write_txn.commit()?;

        debug!(id = %camera.id, gate = %camera.gate, role = %camera.role, "Camera registered");
        Ok(())
    }

    fn get_camera(&self, id: CameraId) -> Result<Option<Camera>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CAMERAS_TABLE)?;

        match table.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_cameras(&self, tenant_id: TenantId) -> Result<Vec<Camera>> {
        let read_txn = self.db.begin_read()?;
        let by_tenant = read_txn.open_multimap_table(CAMERAS_BY_TENANT_TABLE)?;
        let table = read_txn.open_table(CAMERAS_TABLE)?;

        let mut cameras = Vec::new();
        for id in ids_in(&by_tenant, tenant_id.as_bytes())? {
            if let Some(value) = table.get(&id)? {
                cameras.push(decode(value.value())?);
            }
        }
        Ok(cameras)
    }

    fn delete_camera(&self, id: CameraId) -> Result<bool> {
        let write_txn = self.begin_write()?;
        {
            let mut cameras = write_txn.open_table(CAMERAS_TABLE)?;
            let camera: Camera = match cameras.remove(id.as_bytes())? {
                Some(value) => decode(value.value())?,
                None => return Ok(false),
            };
            let mut by_tenant = write_txn.open_multimap_table(CAMERAS_BY_TENANT_TABLE)?;
            by_tenant.remove(camera.tenant_id.as_bytes(), id.as_bytes())?;
        }
        write_txn.commit()?;

        debug!(camera = %id, "Camera deleted");
        Ok(true)
    }

    // =========================================================================
    // Access log
    // =========================================================================

    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<()> {
        let bytes = bincode::serialize(entry)?;
        let key = access_log_key(entry.tenant_id, entry.timestamp, entry.id);

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCESS_LOG_TABLE)?;
            table.insert(&key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_access_log(
        &self,
        tenant_id: TenantId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>> {
        let (start, end) = access_log_range(tenant_id, since);

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCESS_LOG_TABLE)?;

        let mut entries = Vec::new();
        for result in table.range::<&[u8; super::schema::ACCESS_LOG_KEY_LEN]>(&start..=&end)?.take(limit) {
            let (_, value) = result?;
            entries.push(decode(value.value())?);
        }
        Ok(entries)
    }
}

// RedbCatalog is auto Send + Sync: Database, CatalogMetadata, PathBuf and
// SyncMode are all Send + Sync.
