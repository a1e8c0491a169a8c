//! Catalog record types: tenants, identities, reference vectors, cameras.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TenantSettings;
use crate::error::InputError;
use crate::types::{CameraId, IdentityId, ReferenceId, TenantId, Timestamp};

/// Maximum length of a tenant name, identity name, gate or location.
pub const MAX_NAME_LENGTH: usize = 200;

/// An organization with an isolated set of identities and cameras.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique identifier (UUID v7).
    pub id: TenantId,

    /// Unique, lowercased organization name.
    pub name: String,

    /// Dimension of every reference vector in this tenant.
    pub embedding_dimension: usize,

    /// Identification settings; `None` uses the configured defaults.
    pub settings: Option<TenantSettings>,

    /// When the tenant was created.
    pub created_at: Timestamp,
}

impl Tenant {
    /// Creates a new tenant record with a normalized name.
    pub fn new(name: &str, embedding_dimension: usize) -> Result<Self, InputError> {
        Ok(Self {
            id: TenantId::new(),
            name: normalize_tenant_name(name)?,
            embedding_dimension,
            settings: None,
            created_at: Timestamp::now(),
        })
    }

    /// Settings in effect for this tenant.
    pub fn effective_settings(&self, defaults: &TenantSettings) -> TenantSettings {
        self.settings.unwrap_or(*defaults)
    }
}

/// One enrolled person within a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique identifier (UUID v7).
    pub id: IdentityId,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Display name, unique within the tenant.
    pub full_name: String,

    /// When the identity was created.
    pub created_at: Timestamp,
}

impl Identity {
    /// Creates a new identity record with a validated name.
    pub fn new(tenant_id: TenantId, full_name: &str) -> Result<Self, InputError> {
        Ok(Self {
            id: IdentityId::new(),
            tenant_id,
            full_name: validate_name("full_name", full_name)?,
            created_at: Timestamp::now(),
        })
    }
}

/// Metadata of one stored reference vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Catalog record id.
    pub id: ReferenceId,

    /// Tenant the owning identity belongs to.
    pub tenant_id: TenantId,

    /// Owning identity.
    pub identity_id: IdentityId,

    /// Vector length.
    pub dimension: usize,

    /// When the vector was enrolled.
    pub enrolled_at: Timestamp,
}

/// A reference vector as loaded from the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredVector {
    /// Catalog record id.
    pub reference_id: ReferenceId,

    /// Owning identity.
    pub identity_id: IdentityId,

    /// The vector (unit-normalized at enrollment).
    pub vector: Vec<f32>,
}

/// Direction of travel a gate camera records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraRole {
    /// Camera facing people entering.
    Entry,
    /// Camera facing people leaving.
    Exit,
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

impl FromStr for CameraRole {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            other => Err(InputError::invalid_field(
                "role",
                format!("expected 'entry' or 'exit', got '{}'", other),
            )),
        }
    }
}

/// A camera installed at a tenant's gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    /// Unique identifier (UUID v7).
    pub id: CameraId,

    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Gate label; (tenant, gate, role) is unique.
    pub gate: String,

    /// Entry or exit.
    pub role: CameraRole,

    /// Optional free-form location.
    pub location: Option<String>,

    /// When the camera was registered.
    pub created_at: Timestamp,
}

impl Camera {
    /// Creates a new camera record with validated fields.
    pub fn new(
        tenant_id: TenantId,
        gate: &str,
        role: CameraRole,
        location: Option<&str>,
    ) -> Result<Self, InputError> {
        let location = match location.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => Some(validate_name("location", l)?),
            None => None,
        };
        Ok(Self {
            id: CameraId::new(),
            tenant_id,
            gate: validate_name("gate", gate)?,
            role,
            location,
            created_at: Timestamp::now(),
        })
    }
}

/// Trims and lowercases a tenant name.
pub fn normalize_tenant_name(name: &str) -> Result<String, InputError> {
    Ok(validate_name("name", name)?.to_lowercase())
}

/// Trims a name and checks it is non-empty and within [`MAX_NAME_LENGTH`].
pub fn validate_name(field: &str, value: &str) -> Result<String, InputError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InputError::invalid_field(field, "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(InputError::invalid_field(
            field,
            format!("must be at most {} characters", MAX_NAME_LENGTH),
        ));
    }
    Ok(trimmed.to_string())
}
