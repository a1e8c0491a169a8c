//! Brute-force inner product index.

use crate::error::{GateError, InputError, Result};

use super::{dot, top_k, BackendKind, VectorIndex};

/// Exact search over a contiguous vector buffer.
///
/// Slot `n` lives at `data[n * dimension..(n + 1) * dimension]`. Used for
/// small tenants, where a linear scan beats graph traversal.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Creates a new empty flat index.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Creates a flat index with room for `capacity` vectors.
    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            data: Vec::with_capacity(dimension * capacity),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn insert(&mut self, slot: usize, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, vector.len()).into());
        }
        if slot != self.len() {
            return Err(GateError::index(format!(
                "flat index expected slot {}, got {}",
                self.len(),
                slot
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &(dyn Fn(&usize) -> bool + Sync),
    ) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, query.len()).into());
        }
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let hits: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .filter(|(slot, _)| filter(slot))
            .map(|(slot, stored)| (slot, dot(query, stored)))
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
