//! Slot table and search over one tenant's reference vectors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::catalog::StoredVector;
use crate::config::{IndexBackend, IndexConfig};
use crate::error::{ConsistencyError, InputError, Result};
use crate::types::{IdentityId, ReferenceId, SlotId, TenantId};

use super::{is_unit, l2_normalize, BackendKind, FlatIndex, HnswIndex, VectorIndex};

/// Identity and catalog record occupying one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLabel {
    /// Identity owning the vector.
    pub identity_id: IdentityId,
    /// Catalog record of the vector.
    pub reference_id: ReferenceId,
    /// Removed slots stay in place and are filtered out of searches.
    pub tombstoned: bool,
}

/// One search result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchHit {
    /// Slot the vector occupies. Never reissued to another vector.
    pub slot: SlotId,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Identity owning the vector.
    pub identity_id: IdentityId,
    /// Catalog record of the vector.
    pub reference_id: ReferenceId,
}

/// Point-in-time statistics for a tenant index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Tenant this index belongs to.
    pub tenant_id: TenantId,
    /// Rebuild counter.
    pub generation: u64,
    /// Slot id the next insert will receive.
    pub next_slot: u64,
    /// Searchable vectors.
    pub live: usize,
    /// Removed vectors awaiting compaction.
    pub tombstoned: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Backing search structure.
    pub backend: BackendKind,
}

/// In-memory nearest-neighbor index over one tenant's reference vectors.
///
/// Slot ids increase monotonically and are never reissued, across
/// rebuilds and compactions included; [`remove`](Self::remove) only
/// tombstones a slot. A generation's slots are contiguous from `base`, so
/// slot `base + n` sits at backend offset `n` and any slot issued before the
/// last rebuild resolves to `UnknownSlot`.
///
/// Every vector must be unit-normalized so that the inner product equals
/// cosine similarity.
pub struct TenantIndex {
    tenant_id: TenantId,
    dimension: usize,
    config: IndexConfig,
    generation: u64,
    base: u64,
    labels: Vec<SlotLabel>,
    by_reference: HashMap<ReferenceId, SlotId>,
    live: usize,
    backend: Box<dyn VectorIndex>,
}

impl std::fmt::Debug for TenantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantIndex")
            .field("tenant_id", &self.tenant_id)
            .field("dimension", &self.dimension)
            .field("generation", &self.generation)
            .field("live", &self.live)
            .field("slots", &self.labels.len())
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl TenantIndex {
    /// Creates an empty index (generation 0).
    pub fn new(tenant_id: TenantId, dimension: usize, config: IndexConfig) -> Self {
        Self::resume(tenant_id, dimension, config, 0)
    }

    /// Creates an empty index whose first slot is `first_slot`.
    ///
    /// Used when reloading a tenant whose earlier index already issued
    /// slots below `first_slot`.
    pub fn resume(
        tenant_id: TenantId,
        dimension: usize,
        config: IndexConfig,
        first_slot: u64,
    ) -> Self {
        let backend = new_backend(&config, dimension, 0);
        Self {
            tenant_id,
            dimension,
            config,
            generation: 0,
            base: first_slot,
            labels: Vec::new(),
            by_reference: HashMap::new(),
            live: 0,
            backend,
        }
    }

    /// Creates an index populated from catalog entries (generation 1).
    pub fn build(
        tenant_id: TenantId,
        dimension: usize,
        config: IndexConfig,
        entries: Vec<StoredVector>,
    ) -> Result<Self> {
        let mut index = Self::new(tenant_id, dimension, config);
        index.rebuild_from(entries)?;
        Ok(index)
    }

    /// Tenant this index belongs to.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Vector dimension accepted by this index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Current rebuild generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of searchable vectors.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no vector is searchable.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Backing search structure currently in use.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Slot id the next insert will receive.
    pub fn next_slot(&self) -> u64 {
        self.base + self.labels.len() as u64
    }

    /// Returns the label of a slot of the current generation, tombstoned
    /// or not.
    pub fn label(&self, slot: SlotId) -> Option<&SlotLabel> {
        self.offset(slot).and_then(|offset| self.labels.get(offset))
    }

    /// Returns the live slot holding a catalog record.
    pub fn slot_of(&self, reference_id: ReferenceId) -> Option<SlotId> {
        self.by_reference.get(&reference_id).copied()
    }

    /// Returns true if the catalog record is live in this index.
    pub fn contains(&self, reference_id: ReferenceId) -> bool {
        self.by_reference.contains_key(&reference_id)
    }

    /// Inserts a unit-normalized vector and returns its new slot.
    ///
    /// Inserting a record that is already live returns its existing slot.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` if the vector has the wrong length
    /// - `InvalidVector` if the vector is not unit-normalized
    pub fn insert(
        &mut self,
        reference_id: ReferenceId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<SlotId> {
        if vector.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, vector.len()).into());
        }
        if !is_unit(vector) {
            return Err(InputError::InvalidVector("vector is not unit-normalized".into()).into());
        }
        if let Some(&slot) = self.by_reference.get(&reference_id) {
            return Ok(slot);
        }

        self.maybe_promote()?;

        let slot = SlotId(self.next_slot());
        self.backend.insert(self.labels.len(), vector)?;
        self.labels.push(SlotLabel {
            identity_id,
            reference_id,
            tombstoned: false,
        });
        self.by_reference.insert(reference_id, slot);
        self.live += 1;

        debug!(tenant = %self.tenant_id, %slot, %reference_id, "Inserted reference vector");
        Ok(slot)
    }

    /// Tombstones a slot so searches skip it.
    ///
    /// Removing an already tombstoned slot is a no-op.
    ///
    /// # Errors
    ///
    /// `UnknownSlot` if the slot was never issued or belongs to an earlier
    /// generation.
    pub fn remove(&mut self, slot: SlotId) -> Result<()> {
        let label = self
            .offset(slot)
            .and_then(|offset| self.labels.get_mut(offset))
            .ok_or(ConsistencyError::UnknownSlot(slot.0))?;
        if label.tombstoned {
            return Ok(());
        }
        label.tombstoned = true;
        let reference_id = label.reference_id;
        self.by_reference.remove(&reference_id);
        self.live -= 1;

        debug!(tenant = %self.tenant_id, %slot, %reference_id, "Tombstoned reference vector");
        Ok(())
    }

    /// Tombstones the slot holding a catalog record, if it is live.
    pub fn remove_reference(&mut self, reference_id: ReferenceId) -> Result<Option<SlotId>> {
        match self.by_reference.get(&reference_id).copied() {
            Some(slot) => {
                self.remove(slot)?;
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }

    /// Returns the `k` most similar live vectors.
    ///
    /// The query must already be unit-normalized. Results are sorted by
    /// similarity descending, ties broken by the lower slot id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(InputError::dimension_mismatch(self.dimension, query.len()).into());
        }
        if k == 0 || self.live == 0 {
            return Ok(Vec::new());
        }

        let labels = &self.labels;
        let live = |offset: &usize| labels.get(*offset).is_some_and(|l| !l.tombstoned);
        let hits = self.backend.search(query, k, &live)?;

        Ok(hits
            .into_iter()
            .filter_map(|(offset, similarity)| {
                labels.get(offset).map(|label| SearchHit {
                    slot: SlotId(self.base + offset as u64),
                    similarity,
                    identity_id: label.identity_id,
                    reference_id: label.reference_id,
                })
            })
            .collect())
    }

    /// Replaces the whole structure with the given catalog entries.
    ///
    /// Starts a new generation whose slots continue after every slot issued
    /// so far, assigned in entry order. Entries
    /// with the wrong dimension or a zero norm are skipped and logged;
    /// duplicate records keep their first occurrence. The previous
    /// structure stays in place if building the new one fails.
    ///
    /// Returns the number of live vectors after the rebuild.
    pub fn rebuild_from(&mut self, entries: Vec<StoredVector>) -> Result<usize> {
        let base = self.next_slot();
        let mut labels = Vec::with_capacity(entries.len());
        let mut by_reference = HashMap::with_capacity(entries.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.vector.len() != self.dimension {
                error!(
                    tenant = %self.tenant_id,
                    reference_id = %entry.reference_id,
                    expected = self.dimension,
                    got = entry.vector.len(),
                    "Skipping reference vector with wrong dimension"
                );
                continue;
            }
            if by_reference.contains_key(&entry.reference_id) {
                continue;
            }
            let Some(vector) = l2_normalize(&entry.vector) else {
                warn!(
                    tenant = %self.tenant_id,
                    reference_id = %entry.reference_id,
                    "Skipping reference vector that cannot be normalized"
                );
                continue;
            };

            by_reference.insert(entry.reference_id, SlotId(base + labels.len() as u64));
            labels.push(SlotLabel {
                identity_id: entry.identity_id,
                reference_id: entry.reference_id,
                tombstoned: false,
            });
            vectors.push(vector);
        }

        let mut backend = new_backend(&self.config, self.dimension, vectors.len());
        let batch: Vec<(&Vec<f32>, usize)> = vectors.iter().zip(0..).collect();
        backend.insert_batch(&batch)?;

        self.backend = backend;
        self.base = base;
        self.live = labels.len();
        self.labels = labels;
        self.by_reference = by_reference;
        self.generation += 1;

        debug!(
            tenant = %self.tenant_id,
            generation = self.generation,
            first_slot = self.base,
            live = self.live,
            backend = %self.backend.kind(),
            "Rebuilt tenant index"
        );
        Ok(self.live)
    }

    /// Rebuilds the index from its own live slots, dropping tombstones.
    ///
    /// Returns the number of slots reclaimed.
    pub fn compact(&mut self) -> Result<usize> {
        let reclaimed = self.labels.len() - self.live;
        let entries = self.live_entries();
        self.rebuild_from(entries)?;
        Ok(reclaimed)
    }

    /// Copies out every live slot as a catalog-shaped entry, in slot order.
    pub fn live_entries(&self) -> Vec<StoredVector> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| !label.tombstoned)
            .filter_map(|(slot, label)| {
                self.backend.vector(slot).map(|vector| StoredVector {
                    reference_id: label.reference_id,
                    identity_id: label.identity_id,
                    vector: vector.to_vec(),
                })
            })
            .collect()
    }

    /// Fraction of assigned slots that are tombstoned.
    pub fn tombstone_ratio(&self) -> f32 {
        if self.labels.is_empty() {
            0.0
        } else {
            (self.labels.len() - self.live) as f32 / self.labels.len() as f32
        }
    }

    /// Returns true if the tombstone ratio exceeds the configured
    /// compaction ratio.
    pub fn needs_compaction(&self) -> bool {
        self.config.compaction_ratio > 0.0 && self.tombstone_ratio() > self.config.compaction_ratio
    }

    /// Returns point-in-time statistics.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            tenant_id: self.tenant_id,
            generation: self.generation,
            next_slot: self.next_slot(),
            live: self.live,
            tombstoned: self.labels.len() - self.live,
            dimension: self.dimension,
            backend: self.backend.kind(),
        }
    }

    /// Backend offset of a slot issued in the current generation.
    fn offset(&self, slot: SlotId) -> Option<usize> {
        let offset = usize::try_from(slot.0.checked_sub(self.base)?).ok()?;
        (offset < self.labels.len()).then_some(offset)
    }

    /// Switches a flat backend to HNSW when an `Auto` threshold is crossed.
    ///
    /// Every offset (tombstoned ones included) is carried over so slot ids
    /// stay valid.
    fn maybe_promote(&mut self) -> Result<()> {
        let IndexBackend::Auto { hnsw_threshold } = self.config.backend else {
            return Ok(());
        };
        if self.backend.kind() != BackendKind::Flat || self.live + 1 < hnsw_threshold {
            return Ok(());
        }

        let vectors: Vec<Vec<f32>> = (0..self.backend.len())
            .filter_map(|slot| self.backend.vector(slot).map(<[f32]>::to_vec))
            .collect();
        let promoted = HnswIndex::from_vectors(self.dimension, &self.config.hnsw, &vectors)?;
        self.backend = Box::new(promoted);

        debug!(
            tenant = %self.tenant_id,
            slots = vectors.len(),
            "Promoted tenant index to HNSW"
        );
        Ok(())
    }
}

/// Picks the backend for an index about to hold `live` vectors.
fn new_backend(config: &IndexConfig, dimension: usize, live: usize) -> Box<dyn VectorIndex> {
    let use_hnsw = match config.backend {
        IndexBackend::Flat => false,
        IndexBackend::Hnsw => true,
        IndexBackend::Auto { hnsw_threshold } => live >= hnsw_threshold,
    };
    if use_hnsw {
        Box::new(HnswIndex::new(dimension, &config.hnsw))
    } else {
        Box::new(FlatIndex::with_capacity(dimension, live))
    }
}
