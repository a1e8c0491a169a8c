//! # FaceGate
//!
//! Embedded multi-tenant face identity index for access control.
//!
//! FaceGate keeps a durable catalog of tenants, enrolled identities,
//! reference face embeddings and cameras, and answers "who is at this
//! gate?" by searching an in-memory per-tenant vector index.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use facegate::{CameraRole, Config, FaceGate};
//!
//! // Open or create a catalog; `models` implements EmbeddingCapability
//! let gate = FaceGate::open("./facegate.db", Config::default(), Arc::new(models))?;
//!
//! let acme = gate.create_tenant("acme")?;
//! let john = gate.create_identity(acme, "John Doe")?;
//! let door = gate.register_camera(acme, "front door", CameraRole::Entry, None)?;
//!
//! gate.enroll_reference(acme, john, &portrait)?;
//!
//! let result = gate.identify(acme, door, &frame)?;
//! for face in result.matches() {
//!     println!("{:?} ({:.2})", face.identity_id, face.similarity);
//! }
//!
//! gate.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Tenant
//!
//! A **tenant** is an isolated organization. Its identities, cameras and
//! index are never visible to another tenant.
//!
//! ### Catalog and index
//!
//! The **catalog** is the source of truth. Each tenant's **index** is a
//! cache of its reference vectors, loaded lazily and rebuildable from the
//! catalog at any time. Small tenants use exact search; large ones switch
//! to HNSW.
//!
//! ### Embedding capability
//!
//! Face detection and embedding are supplied by the caller through
//! [`EmbeddingCapability`](embedding::EmbeddingCapability), typically a
//! [`ModelPipeline`](embedding::ModelPipeline) wrapping a detector and an
//! embedder model.
//!
//! ## Thread Safety
//!
//! `FaceGate` is `Send + Sync` and can be shared across threads using `Arc`.
//! Identifications run concurrently; enrollment into a tenant excludes
//! identification for that tenant while it writes. [`AsyncFaceGate`] runs
//! the same operations from async code.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod async_gate;
mod config;
mod db;
mod enroll;
mod error;
mod identify;
mod types;

pub mod access;
pub mod catalog;
pub mod embedding;
pub mod registry;

/// Per-tenant vector index with exact and HNSW backends.
pub mod index;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main interfaces
pub use async_gate::AsyncFaceGate;
pub use db::FaceGate;

// Configuration
pub use config::{
    Config, EmbeddingDimension, HnswConfig, IndexBackend, IndexConfig, RegistryConfig, SyncMode,
    TenantSettings, MAX_DIMENSION, MAX_TOP_K,
};

// Error handling
pub use error::{
    ConsistencyError, GateError, InputError, NotFoundError, ResourceError, Result, StorageError,
};

// Core types
pub use types::{
    AccessLogId, BoundingBox, CameraId, Embedding, IdentityId, ReferenceId, SlotId, TenantId,
    Timestamp,
};

// Domain types
pub use access::AccessLogEntry;
pub use catalog::{Camera, CameraRole, Identity, ReferenceRecord, Tenant};
pub use enroll::EnrollmentCoordinator;
pub use identify::{Candidate, FaceMatch, Identification, IdentificationPipeline};
pub use index::IndexStats;
pub use registry::{CancelToken, IndexState};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common FaceGate usage.
///
/// ```rust
/// use facegate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, EmbeddingDimension, TenantSettings};
    pub use crate::db::FaceGate;
    pub use crate::embedding::{EmbeddingCapability, ModelPipeline};
    pub use crate::error::{GateError, Result};
    pub use crate::identify::{FaceMatch, Identification};
    pub use crate::catalog::CameraRole;
    pub use crate::types::{CameraId, IdentityId, ReferenceId, TenantId, Timestamp};
}
