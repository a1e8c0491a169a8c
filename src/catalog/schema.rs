//! Catalog schema definitions and versioning.
//!
//! This module defines the table structure for the redb catalog.
//! All table definitions are compile-time constants to ensure consistency.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the metadata table. When opening an
//! existing catalog, we check the version and fail if it doesn't match.
//!
//! # Table Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE          &str      -> bincode CatalogMetadata │
//! │ TENANTS_TABLE           TenantId  -> bincode Tenant          │
//! │ TENANT_NAMES_TABLE      &str      -> TenantId                │
//! │ IDENTITIES_TABLE        IdentityId -> bincode Identity       │
//! │ IDENTITY_NAMES_TABLE    TenantId ++ name -> IdentityId       │
//! │ IDENTITIES_BY_TENANT    TenantId  =>> IdentityId (multimap)  │
//! │ REFERENCES_TABLE        ReferenceId -> bincode ReferenceRecord│
//! │ VECTORS_TABLE           ReferenceId -> raw LE f32            │
//! │ REFERENCES_BY_TENANT    TenantId  =>> ReferenceId (multimap) │
//! │ REFERENCES_BY_IDENTITY  IdentityId =>> ReferenceId (multimap)│
//! │ CAMERAS_TABLE           CameraId  -> bincode Camera          │
//! │ CAMERAS_BY_TENANT       TenantId  =>> CameraId (multimap)    │
//! │ ACCESS_LOG_TABLE        TenantId ++ ts(BE) ++ AccessLogId     │
//! │                                   -> bincode AccessLogEntry  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All ids are UUID v7, so multimap values (sorted by redb) come back in
//! creation order.

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingDimension;
use crate::types::{AccessLogId, TenantId, Timestamp};

/// Current schema version.
///
/// Increment this when making breaking changes to the schema.
/// The catalog will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

/// Size of an access log key: tenant (16) + timestamp (8) + entry id (16).
pub const ACCESS_LOG_KEY_LEN: usize = 40;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for catalog-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Tenants table.
pub const TENANTS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("tenants");

/// Tenant name uniqueness index.
pub const TENANT_NAMES_TABLE: TableDefinition<&str, &[u8; 16]> =
    TableDefinition::new("tenant_names");

/// Identities table.
pub const IDENTITIES_TABLE: TableDefinition<&[u8; 16], &[u8]> =
    TableDefinition::new("identities");

/// Identity name uniqueness index, scoped by tenant.
///
/// Key: TenantId bytes followed by the UTF-8 display name.
pub const IDENTITY_NAMES_TABLE: TableDefinition<&[u8], &[u8; 16]> =
    TableDefinition::new("identity_names");

/// Index: identities by tenant.
pub const IDENTITIES_BY_TENANT_TABLE: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("identities_by_tenant");

/// Reference vector metadata.
pub const REFERENCES_TABLE: TableDefinition<&[u8; 16], &[u8]> =
    TableDefinition::new("references");

/// Reference vectors.
///
/// Stored separately from the metadata to keep the main table compact.
/// Value: raw f32 bytes (dimension * 4 bytes, little-endian).
pub const VECTORS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("vectors");

/// Index: reference vectors by tenant.
pub const REFERENCES_BY_TENANT_TABLE: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("references_by_tenant");

/// Index: reference vectors by identity.
pub const REFERENCES_BY_IDENTITY_TABLE: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("references_by_identity");

/// Cameras table.
pub const CAMERAS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("cameras");

/// Index: cameras by tenant.
pub const CAMERAS_BY_TENANT_TABLE: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("cameras_by_tenant");

/// Access log, ordered by tenant then time.
///
/// Not touched by tenant or camera deletion.
pub const ACCESS_LOG_TABLE: TableDefinition<&[u8; ACCESS_LOG_KEY_LEN], &[u8]> =
    TableDefinition::new("access_log");

// ============================================================================
// Keys
// ============================================================================

/// Builds the identity-name index key.
pub fn identity_name_key(tenant_id: TenantId, full_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + full_name.len());
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(full_name.as_bytes());
    key
}

/// Builds an access log key.
pub fn access_log_key(
    tenant_id: TenantId,
    timestamp: Timestamp,
    id: AccessLogId,
) -> [u8; ACCESS_LOG_KEY_LEN] {
    let mut key = [0u8; ACCESS_LOG_KEY_LEN];
    key[..16].copy_from_slice(tenant_id.as_bytes());
    key[16..24].copy_from_slice(&timestamp.to_be_bytes());
    key[24..].copy_from_slice(id.as_bytes());
    key
}

/// Inclusive key range covering a tenant's log entries at or after `since`.
pub fn access_log_range(
    tenant_id: TenantId,
    since: Option<Timestamp>,
) -> ([u8; ACCESS_LOG_KEY_LEN], [u8; ACCESS_LOG_KEY_LEN]) {
    let mut start = [0u8; ACCESS_LOG_KEY_LEN];
    start[..16].copy_from_slice(tenant_id.as_bytes());
    // Negative timestamps sort after positive ones in big-endian two's
    // complement, so clamp the lower bound at the epoch.
    let since = since.map_or(0, |t| t.as_millis().max(0));
    start[16..24].copy_from_slice(&since.to_be_bytes());

    let mut end = [0xFFu8; ACCESS_LOG_KEY_LEN];
    end[..16].copy_from_slice(tenant_id.as_bytes());
    end[16..24].copy_from_slice(&i64::MAX.to_be_bytes());
    (start, end)
}

// ============================================================================
// Catalog Metadata
// ============================================================================

/// Catalog metadata stored in the metadata table.
///
/// This is serialized with bincode and stored under the key "catalog_metadata".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Embedding dimension configured for this catalog.
    ///
    /// Once set, this cannot be changed without recreating the catalog.
    pub embedding_dimension: EmbeddingDimension,

    /// Timestamp when the catalog was created.
    pub created_at: Timestamp,

    /// Last time the catalog was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl CatalogMetadata {
    /// Creates new metadata for a fresh catalog.
    pub fn new(embedding_dimension: EmbeddingDimension) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_dimension,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Checks if the schema version is compatible.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}
