//! HNSW vector index implementation using hnsw_rs.
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistCosine>` with:
//! - A copy of every vector for exact rescoring of graph candidates
//! - Filter-during-traversal for tombstoned slots
//!
//! Graph search is approximate and its ordering among near-equal
//! candidates is not stable, so candidates are rescored with the exact
//! inner product and ranked the same way [`FlatIndex`](super::FlatIndex)
//! ranks them.

use anndists::dist::distances::DistCosine;
use hnsw_rs::prelude::*;

use crate::config::HnswConfig;
use crate::error::{GateError, InputError, Result};

use super::{dot, top_k, BackendKind, VectorIndex};

/// Extra candidates fetched from the graph per requested neighbor.
const CANDIDATE_FACTOR: usize = 4;

/// Minimum number of extra candidates fetched from the graph.
const MIN_EXTRA_CANDIDATES: usize = 16;

/// Newtype wrapper that bridges `&dyn Fn(&usize) -> bool` to `FilterT`.
///
/// hnsw_rs's blanket impl `impl<F: Fn(&DataId) -> bool> FilterT for F`
/// only covers concrete types, so a `&dyn Fn` trait object cannot be
/// passed to `search_filter` directly.
struct FilterBridge<'a>(&'a (dyn Fn(&usize) -> bool + Sync));

impl FilterT for FilterBridge<'_> {
    fn hnsw_filter(&self, id: &DataId) -> bool {
        (self.0)(id)
    }
}

/// HNSW vector index backed by `hnsw_rs`.
///
/// Each tenant gets its own `HnswIndex` instance once it grows past the
/// configured threshold, so graphs never mix tenants.
pub struct HnswIndex {
    /// The underlying HNSW graph. Uses `'static` lifetime because
    /// all data is heap-owned (not memory-mapped).
    hnsw: Hnsw<'static, f32, DistCosine>,

    /// Stored vectors, slot `n` at `data[n * dimension..]`.
    data: Vec<f32>,

    /// Candidate list size during search.
    ef_search: usize,

    /// Embedding dimension (must match all inserted vectors).
    dimension: usize,
}

impl HnswIndex {
    /// Creates a new empty HNSW index.
    ///
    /// # Arguments
    ///
    /// * `dimension` - Expected embedding dimension (validated on insert)
    /// * `config` - HNSW tuning parameters
    pub fn new(dimension: usize, config: &HnswConfig) -> Self {
        let hnsw = Hnsw::new(
            config.max_nb_connection,
            config.max_elements,
            config.max_layer,
            config.ef_construction,
            DistCosine {},
        );

        Self {
            hnsw,
            data: Vec::new(),
            ef_search: config.ef_search,
            dimension,
        }
    }

    /// Builds an index from vectors in slot order.
    ///
    /// Slot `n` is assigned to `vectors[n]`. The graph is filled with a
    /// parallel bulk insert.
    pub fn from_vectors(dimension: usize, config: &HnswConfig, vectors: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new(dimension, config);
        let batch: Vec<(&Vec<f32>, usize)> = vectors.iter().zip(0..).collect();
        index.insert_batch(&batch)?;
        Ok(index)
    }

    /// Returns the number of points in the graph.
    pub fn graph_len(&self) -> usize {
        self.hnsw.get_nb_point()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, vector.len()).into());
        }
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Hnsw
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn insert(&mut self, slot: usize, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        if slot != self.len() {
            return Err(GateError::index(format!(
                "hnsw index expected slot {}, got {}",
                self.len(),
                slot
            )));
        }
        self.data.extend_from_slice(vector);
        self.hnsw.insert((vector, slot));
        Ok(())
    }

    fn insert_batch(&mut self, items: &[(&Vec<f32>, usize)]) -> Result<()> {
        let mut expected = self.len();
        for (vector, slot) in items {
            self.check_dimension(vector)?;
            if *slot != expected {
                return Err(GateError::index(format!(
                    "hnsw index expected slot {}, got {}",
                    expected, slot
                )));
            }
            expected += 1;
        }

        for (vector, _) in items {
            self.data.extend_from_slice(vector);
        }
        // Parallel bulk insert (uses rayon internally)
        self.hnsw.parallel_insert(items);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &(dyn Fn(&usize) -> bool + Sync),
    ) -> Result<Vec<(usize, f32)>> {
        self.check_dimension(query)?;
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = (k * CANDIDATE_FACTOR)
            .max(k + MIN_EXTRA_CANDIDATES)
            .min(self.len());
        let ef = self.ef_search.max(candidates);

        let bridge = FilterBridge(filter);
        let neighbours = self.hnsw.search_filter(query, candidates, ef, Some(&bridge));

        let hits: Vec<(usize, f32)> = neighbours
            .into_iter()
            .filter(|n| filter(&n.d_id))
            .filter_map(|n| self.vector(n.d_id).map(|stored| (n.d_id, dot(query, stored))))
            .collect();

        Ok(top_k(hits, k))
    }

    fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }
}
