//! Per-tenant vector index.
//!
//! Each tenant's reference vectors live in a [`TenantIndex`]: a slot table
//! mapping dense slot ids to identities, over a pluggable [`VectorIndex`]
//! search structure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │           TenantIndex            │  slot → (identity, reference), tombstones
//! └──────────────┬───────────────────┘
//!                │ Box<dyn VectorIndex>
//!        ┌───────┴────────┐
//!   ┌────┴──────┐   ┌─────┴─────┐
//!   │ FlatIndex │   │ HnswIndex │  (hnsw_rs candidates + exact rescoring)
//!   └───────────┘   └───────────┘
//! ```
//!
//! Reference vectors stored in the catalog are the **source of truth**. A
//! tenant index is a derived, rebuildable cache: it is never persisted and
//! can always be reconstructed with [`TenantIndex::rebuild_from`].
//!
//! Similarity is cosine similarity computed as a plain inner product, so
//! every vector entering an index must be unit-normalized (see
//! [`l2_normalize`]).

mod flat;
mod hnsw;
mod tenant;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use tenant::{IndexStats, SearchHit, SlotLabel, TenantIndex};

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Allowed deviation of a squared norm from 1.0 for a vector to count as
/// unit-normalized.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Search structure backing a tenant index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Exact brute-force inner product.
    Flat,
    /// HNSW graph candidates, rescored exactly.
    Hnsw,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Hnsw => write!(f, "hnsw"),
        }
    }
}

/// Nearest-neighbor search structure over dense slot ids.
///
/// Slots are `usize` to align with hnsw_rs's `DataId` type and must be
/// inserted densely: the n-th inserted vector occupies slot `n`.
/// Removal is not part of the trait; tombstones are applied through the
/// `filter` passed to [`search`](VectorIndex::search).
///
/// Mutation takes `&mut self`: a backend is only ever mutated by the
/// holder of its tenant's write handle.
pub trait VectorIndex: Send + Sync {
    /// Which structure this is.
    fn kind(&self) -> BackendKind;

    /// Vector dimension accepted by this index.
    fn dimension(&self) -> usize;

    /// Inserts a single vector at the given slot.
    fn insert(&mut self, slot: usize, vector: &[f32]) -> Result<()>;

    /// Inserts a batch of vectors.
    ///
    /// Slots must continue the dense sequence in order.
    fn insert_batch(&mut self, items: &[(&Vec<f32>, usize)]) -> Result<()> {
        for (vector, slot) in items {
            self.insert(*slot, vector)?;
        }
        Ok(())
    }

    /// Searches for the `k` most similar slots accepted by `filter`.
    ///
    /// Returns `(slot, similarity)` pairs sorted by similarity descending,
    /// ties broken by the lower slot.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &(dyn Fn(&usize) -> bool + Sync),
    ) -> Result<Vec<(usize, f32)>>;

    /// Returns the stored vector for a slot.
    fn vector(&self, slot: usize) -> Option<&[f32]>;

    /// Returns the number of slots held (including filtered ones).
    fn len(&self) -> usize;

    /// Returns true if no slot has been inserted.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inner product of two equal-length vectors.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Returns a unit-length copy of `vector`.
///
/// Returns `None` for zero-norm vectors and vectors with non-finite
/// components, which have no direction to preserve.
pub fn l2_normalize(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = dot(vector, vector).sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    Some(vector.iter().map(|x| x / norm).collect())
}

/// Returns true if `vector` has unit L2 norm within [`UNIT_NORM_TOLERANCE`].
pub fn is_unit(vector: &[f32]) -> bool {
    let squared = dot(vector, vector);
    squared.is_finite() && (squared - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Orders hits by similarity descending, then slot ascending.
pub(crate) fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Keeps the best `k` hits in rank order.
pub(crate) fn top_k(mut hits: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    if hits.len() > k {
        hits.select_nth_unstable_by(k - 1, rank_order);
        hits.truncate(k);
    }
    hits.sort_by(rank_order);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(is_unit(&v));
    }

    #[test]
    fn test_l2_normalize_rejects_zero_and_nan() {
        assert!(l2_normalize(&[0.0, 0.0, 0.0]).is_none());
        assert!(l2_normalize(&[1.0, f32::NAN]).is_none());
        assert!(l2_normalize(&[f32::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn test_is_unit() {
        assert!(is_unit(&[1.0, 0.0]));
        assert!(!is_unit(&[1.0, 1.0]));
        assert!(!is_unit(&[0.5, 0.0]));
    }

    #[test]
    fn test_top_k_orders_ties_by_slot() {
        let hits = vec![(4, 0.5), (2, 0.9), (3, 0.9), (1, 0.1), (0, 0.5)];
        let ranked = top_k(hits, 4);
        assert_eq!(ranked, vec![(2, 0.9), (3, 0.9), (0, 0.5), (4, 0.5)]);
    }

    #[test]
    fn test_top_k_zero() {
        assert!(top_k(vec![(0, 1.0)], 0).is_empty());
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Flat.to_string(), "flat");
        assert_eq!(BackendKind::Hnsw.to_string(), "hnsw");
    }
}
