//! Error types for FaceGate.
//!
//! FaceGate uses a hierarchical error system:
//! - `GateError` is the top-level error returned by all public APIs
//! - Specific error types carry the detail for each failure class
//!
//! # Failure Classes
//!
//! | Class | Meaning | Caller action |
//! |-------|---------|---------------|
//! | [`InputError`] | bad image, wrong dimension, no/multiple faces | fix the request |
//! | [`NotFoundError`] | unknown tenant, identity, camera or reference | fix the request |
//! | [`ResourceError`] | catalog or model unavailable, wait abandoned | retry later |
//! | [`ConsistencyError`] | index and catalog diverged | none; the index heals on rebuild |
//! | [`StorageError`] | catalog file corrupt or incompatible | operator intervention |
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use facegate::{FaceGate, Config, Result};
//!
//! fn example(gate: &FaceGate) -> Result<()> {
//!     let tenant = gate.create_tenant("acme")?;
//!     // ... operations that may fail ...
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for FaceGate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Top-level error enum for all FaceGate operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum GateError {
    /// User-correctable request error.
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// An external collaborator (catalog, model) could not serve the request.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Index/catalog divergence or broken internal invariant.
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Catalog storage layer error (corruption, incompatible schema).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a catalog-unavailable resource error.
    pub fn catalog_unavailable(msg: impl Into<String>) -> Self {
        Self::Resource(ResourceError::CatalogUnavailable(msg.into()))
    }

    /// Creates a model-unavailable resource error.
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::Resource(ResourceError::ModelUnavailable(msg.into()))
    }

    /// Creates an index consistency error with the given message.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Consistency(ConsistencyError::IndexDiverged(msg.into()))
    }

    /// Returns true if this is a user-correctable input error.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a resource error.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Returns true if this is a consistency error.
    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the caller may retry the same request later.
    ///
    /// Only resource errors are retryable. FaceGate never retries
    /// them internally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Resource(
                ResourceError::CatalogUnavailable(_)
                    | ResourceError::ModelUnavailable(_)
                    | ResourceError::TenantBusy(_)
                    | ResourceError::TimedOut
            )
        )
    }
}

/// Input errors for data provided by the caller.
#[derive(Debug, Error)]
pub enum InputError {
    /// Image bytes could not be decoded.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Vector dimension doesn't match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A reference image contained no face.
    #[error("No face detected in reference image")]
    NoFaceDetected,

    /// A reference image contained more than one face.
    #[error("Expected exactly one face in reference image, found {count}")]
    MultipleFacesDetected {
        /// Number of faces found.
        count: usize,
    },

    /// Vector cannot be normalized or is not unit length.
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// An entity with the same unique key already exists.
    #[error("Already exists: {what}")]
    AlreadyExists {
        /// Description of the conflicting entity.
        what: String,
    },
}

impl InputError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }
}

/// Not found errors for specific entity types.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Tenant with given ID not found in the catalog.
    #[error("Tenant not found: {0}")]
    Tenant(String),

    /// Identity not found (or not in the given tenant).
    #[error("Identity not found: {0}")]
    Identity(String),

    /// Camera not found (or not in the given tenant).
    #[error("Camera not found: {0}")]
    Camera(String),

    /// Reference vector record not found.
    #[error("Reference vector not found: {0}")]
    Reference(String),
}

impl NotFoundError {
    /// Creates a tenant not found error.
    pub fn tenant(id: impl ToString) -> Self {
        Self::Tenant(id.to_string())
    }

    /// Creates an identity not found error.
    pub fn identity(id: impl ToString) -> Self {
        Self::Identity(id.to_string())
    }

    /// Creates a camera not found error.
    pub fn camera(id: impl ToString) -> Self {
        Self::Camera(id.to_string())
    }

    /// Creates a reference not found error.
    pub fn reference(id: impl ToString) -> Self {
        Self::Reference(id.to_string())
    }
}

/// Errors from external collaborators or abandoned waits.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The persistent catalog could not be reached or failed a transaction.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The detection/embedding capability cannot run.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The tenant index still has outstanding handles.
    #[error("Tenant index busy: {0}")]
    TenantBusy(String),

    /// The caller cancelled a pending acquisition.
    #[error("Request cancelled")]
    Cancelled,

    /// A pending acquisition or request exceeded its deadline.
    #[error("Request timed out")]
    TimedOut,
}

/// Divergence between the index and the catalog.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// The in-memory index no longer mirrors the catalog.
    #[error("Index diverged from catalog: {0}")]
    IndexDiverged(String),

    /// A slot id that the index never assigned.
    #[error("Unknown slot: {0}")]
    UnknownSlot(u64),

    /// An internal lock was poisoned by a panicking thread.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Storage-related errors.
///
/// These errors indicate problems with the catalog file itself.
/// Transient transaction failures surface as
/// [`ResourceError::CatalogUnavailable`] instead.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Catalog file or data is corrupted.
    #[error("Catalog corrupted: {0}")]
    Corrupted(String),

    /// Catalog is locked by another process.
    #[error("Catalog is locked by another writer")]
    DatabaseLocked,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Catalog schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in the catalog.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

// redb failures are reported as an unavailable catalog: the transaction
// did not happen and the caller may retry.
impl From<redb::Error> for GateError {
    fn from(err: redb::Error) -> Self {
        GateError::catalog_unavailable(err.to_string())
    }
}

impl From<redb::DatabaseError> for GateError {
    fn from(err: redb::DatabaseError) -> Self {
        GateError::catalog_unavailable(err.to_string())
    }
}

impl From<redb::TransactionError> for GateError {
    fn from(err: redb::TransactionError) -> Self {
        GateError::catalog_unavailable(format!("Transaction failed: {}", err))
    }
}

impl From<redb::CommitError> for GateError {
    fn from(err: redb::CommitError) -> Self {
        GateError::catalog_unavailable(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for GateError {
    fn from(err: redb::TableError) -> Self {
        GateError::catalog_unavailable(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for GateError {
    fn from(err: redb::StorageError) -> Self {
        GateError::catalog_unavailable(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for GateError {
    fn from(err: bincode::Error) -> Self {
        GateError::Storage(StorageError::from(err))
    }
}
