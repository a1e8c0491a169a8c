//! Configuration types for FaceGate.
//!
//! The [`Config`] struct controls:
//! - Embedding dimension (128, 512, or custom)
//! - Default per-tenant identification settings (threshold, top-k)
//! - Index backend selection and HNSW tuning
//! - Registry waits and idle eviction
//! - Catalog durability
//!
//! # Example
//! ```rust
//! use facegate::{Config, EmbeddingDimension, TenantSettings};
//!
//! // Use defaults (128 dimensions, threshold 0.8, top-1)
//! let config = Config::default();
//!
//! // Customize
//! let config = Config {
//!     embedding_dimension: EmbeddingDimension::D512,
//!     tenant_defaults: TenantSettings {
//!         similarity_threshold: 0.6,
//!         top_k: 3,
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! Configuration can also be read from JSON; missing fields keep their
//! defaults:
//! ```rust
//! use facegate::Config;
//!
//! let config = Config::from_json_str(r#"{ "tenant_defaults": { "top_k": 5 } }"#).unwrap();
//! assert_eq!(config.tenant_defaults.top_k, 5);
//! assert_eq!(config.tenant_defaults.similarity_threshold, 0.8);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, InputError, Result};

/// Upper bound for configurable top-k.
pub const MAX_TOP_K: usize = 100;

/// Upper bound for custom embedding dimensions.
pub const MAX_DIMENSION: usize = 4096;

/// Database configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding vector dimension (must match the capability output).
    pub embedding_dimension: EmbeddingDimension,

    /// Identification settings for tenants without their own override.
    pub tenant_defaults: TenantSettings,

    /// Vector index settings.
    pub index: IndexConfig,

    /// Tenant index registry settings.
    pub registry: RegistryConfig,

    /// Durability mode for catalog writes.
    pub sync_mode: SyncMode,
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config for a given embedding dimension.
    ///
    /// # Example
    /// ```rust
    /// use facegate::{Config, EmbeddingDimension};
    ///
    /// // ArcFace-style models produce 512-dimensional embeddings
    /// let config = Config::with_dimension(EmbeddingDimension::D512);
    /// assert_eq!(config.dimension(), 512);
    /// ```
    pub fn with_dimension(dimension: EmbeddingDimension) -> Self {
        Self {
            embedding_dimension: dimension,
            ..Default::default()
        }
    }

    /// Parses a JSON document over the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| GateError::config(format!("Invalid configuration JSON: {}", e)))?;
        config.validate().map_err(GateError::from)?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `FaceGate::open()`.
    ///
    /// # Errors
    /// Returns `InputError::InvalidField` if any setting is out of range.
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        if let EmbeddingDimension::Custom(dim) = self.embedding_dimension {
            if dim == 0 {
                return Err(InputError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must be greater than 0",
                ));
            }
            if dim > MAX_DIMENSION {
                return Err(InputError::invalid_field(
                    "embedding_dimension",
                    format!("custom dimension must not exceed {}", MAX_DIMENSION),
                ));
            }
        }

        self.tenant_defaults.validate()?;

        if !(0.0..1.0).contains(&self.index.compaction_ratio) {
            return Err(InputError::invalid_field(
                "index.compaction_ratio",
                "must be in [0.0, 1.0)",
            ));
        }

        if let IndexBackend::Auto { hnsw_threshold } = self.index.backend {
            if hnsw_threshold == 0 {
                return Err(InputError::invalid_field(
                    "index.backend.hnsw_threshold",
                    "must be greater than 0",
                ));
            }
        }

        let hnsw = &self.index.hnsw;
        if hnsw.max_nb_connection == 0 || hnsw.ef_construction == 0 || hnsw.ef_search == 0 {
            return Err(InputError::invalid_field(
                "index.hnsw",
                "connection count and ef parameters must be greater than 0",
            ));
        }
        // hnsw_rs supports at most 16 layers
        if hnsw.max_layer == 0 || hnsw.max_layer > 16 {
            return Err(InputError::invalid_field(
                "index.hnsw.max_layer",
                "must be between 1 and 16",
            ));
        }

        if self.registry.poll_interval_ms == 0 {
            return Err(InputError::invalid_field(
                "registry.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Returns the embedding dimension as a numeric value.
    pub fn dimension(&self) -> usize {
        self.embedding_dimension.size()
    }
}

/// Embedding vector dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDimension {
    /// 128 dimensions (SFace, FaceNet-128).
    #[default]
    D128,

    /// 512 dimensions (ArcFace, FaceNet-512).
    D512,

    /// Custom dimension for other embedding models.
    ///
    /// Must be between 1 and 4096.
    Custom(usize),
}

impl EmbeddingDimension {
    /// Returns the numeric size of this dimension.
    ///
    /// # Example
    /// ```rust
    /// use facegate::EmbeddingDimension;
    ///
    /// assert_eq!(EmbeddingDimension::D128.size(), 128);
    /// assert_eq!(EmbeddingDimension::Custom(64).size(), 64);
    /// ```
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::D128 => 128,
            Self::D512 => 512,
            Self::Custom(n) => *n,
        }
    }

    /// Maps a numeric size to the matching variant.
    pub const fn from_size(size: usize) -> Self {
        match size {
            128 => Self::D128,
            512 => Self::D512,
            n => Self::Custom(n),
        }
    }
}

/// Per-tenant identification settings.
///
/// Stored on the tenant record when overridden; otherwise
/// [`Config::tenant_defaults`] applies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    /// Minimum cosine similarity to accept the nearest neighbor as a match.
    pub similarity_threshold: f32,

    /// Number of nearest neighbors to retrieve per detected face.
    pub top_k: usize,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            top_k: 1,
        }
    }
}

impl TenantSettings {
    /// Validates threshold range and top-k bounds.
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        if !self.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(InputError::invalid_field(
                "similarity_threshold",
                format!(
                    "must be between -1.0 and 1.0, got {}",
                    self.similarity_threshold
                ),
            ));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(InputError::invalid_field(
                "top_k",
                format!("must be between 1 and {}, got {}", MAX_TOP_K, self.top_k),
            ));
        }
        Ok(())
    }
}

/// Vector index settings shared by every tenant index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Which search structure backs a tenant index.
    pub backend: IndexBackend,

    /// HNSW tuning parameters.
    pub hnsw: HnswConfig,

    /// Tombstoned/total slot ratio above which a removal compacts the index.
    ///
    /// `0.0` disables automatic compaction.
    pub compaction_ratio: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            hnsw: HnswConfig::default(),
            compaction_ratio: 0.25,
        }
    }
}

/// Search structure selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBackend {
    /// Brute-force inner product below `hnsw_threshold` live vectors, HNSW
    /// at or above it.
    Auto {
        /// Live vector count at which the index switches to HNSW.
        hnsw_threshold: usize,
    },

    /// Always brute force (exact).
    Flat,

    /// Always HNSW (approximate candidates, exact rescoring).
    Hnsw,
}

impl Default for IndexBackend {
    fn default() -> Self {
        Self::Auto {
            hnsw_threshold: 10_000,
        }
    }
}

/// HNSW graph parameters (passed through to `hnsw_rs`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum neighbors per node.
    pub max_nb_connection: usize,

    /// Candidate list size during construction.
    pub ef_construction: usize,

    /// Candidate list size during search.
    pub ef_search: usize,

    /// Maximum number of graph layers (1..=16).
    pub max_layer: usize,

    /// Capacity hint for the graph.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layer: 16,
            max_elements: 100_000,
        }
    }
}

/// Tenant index registry settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Default upper bound on waiting for a read/write handle.
    ///
    /// `None` waits until the handle is granted or the caller cancels.
    pub acquire_timeout_ms: Option<u64>,

    /// Idle time after which `evict_idle` drops a tenant index.
    ///
    /// `None` disables idle eviction.
    pub idle_eviction_ms: Option<u64>,

    /// How often a blocked acquisition re-checks its cancel token.
    pub poll_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: Some(30_000),
            idle_eviction_ms: Some(15 * 60 * 1000),
            poll_interval_ms: 10,
        }
    }
}

impl RegistryConfig {
    /// Default acquisition timeout as a `Duration`.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Idle eviction threshold as a `Duration`.
    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction_ms.map(Duration::from_millis)
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Durability mode for catalog writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit.
    #[default]
    Normal,

    /// Defer syncing (faster writes, may lose the most recent commits on crash).
    Fast,

    /// Sync with additional checksum verification on commit.
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode is paranoid.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }

    /// Returns true if this mode may lose recent data on crash.
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}
