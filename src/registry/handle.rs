//! Scoped read and write access to a tenant index.
//!
//! A handle is counted in its tenant entry from the moment it is granted
//! until it is dropped, on every exit path. `release()` is an explicit
//! drop.

use std::sync::Arc;

use tracing::error;

use crate::catalog::StoredVector;
use crate::error::Result;
use crate::index::{IndexStats, SearchHit, TenantIndex};
use crate::types::{IdentityId, ReferenceId, SlotId, TenantId};

use super::{Phase, TenantEntry};

/// Shared access to a tenant index. Many may be held at once.
#[derive(Debug)]
pub struct ReadHandle {
    entry: Arc<TenantEntry>,
}

impl ReadHandle {
    pub(super) fn new(entry: Arc<TenantEntry>) -> Self {
        Self { entry }
    }

    /// Tenant this handle is for.
    pub fn tenant_id(&self) -> TenantId {
        self.entry.tenant_id
    }

    /// Returns the `k` most similar live vectors to a unit-normalized query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.entry.with_index(|index| index.search(query, k))
    }

    /// Number of searchable vectors.
    pub fn len(&self) -> Result<usize> {
        self.entry.with_index(|index| Ok(index.len()))
    }

    /// Returns true if the tenant has no searchable vectors.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Result<IndexStats> {
        self.entry.with_index(|index| Ok(index.stats()))
    }

    /// Releases the handle.
    pub fn release(self) {}
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        let mut state = self.entry.lock_state_recover();
        state.readers = state.readers.saturating_sub(1);
        state.touch();
        drop(state);
        self.entry.changed.notify_all();
    }
}

/// Exclusive access to a tenant index.
#[derive(Debug)]
pub struct WriteHandle {
    entry: Arc<TenantEntry>,
}

impl WriteHandle {
    pub(super) fn new(entry: Arc<TenantEntry>) -> Self {
        Self { entry }
    }

    /// Tenant this handle is for.
    pub fn tenant_id(&self) -> TenantId {
        self.entry.tenant_id
    }

    /// Inserts a unit-normalized vector; see [`TenantIndex::insert`].
    pub fn insert(
        &self,
        reference_id: ReferenceId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<SlotId> {
        self.entry
            .with_index_mut(|index| index.insert(reference_id, identity_id, vector))
    }

    /// Tombstones a slot; see [`TenantIndex::remove`].
    pub fn remove(&self, slot: SlotId) -> Result<()> {
        self.entry.with_index_mut(|index| index.remove(slot))
    }

    /// Tombstones the slot holding a catalog record, if live.
    pub fn remove_reference(&self, reference_id: ReferenceId) -> Result<Option<SlotId>> {
        self.entry
            .with_index_mut(|index| index.remove_reference(reference_id))
    }

    /// Replaces the index contents; see [`TenantIndex::rebuild_from`].
    pub fn rebuild_from(&self, entries: Vec<StoredVector>) -> Result<usize> {
        self.entry.with_index_mut(|index| index.rebuild_from(entries))
    }

    /// Compacts the index if its tombstone ratio exceeds the configured
    /// compaction ratio. Returns the number of slots reclaimed.
    pub fn compact_if_needed(&self) -> Result<usize> {
        self.entry.with_index_mut(|index| {
            if index.needs_compaction() {
                index.compact()
            } else {
                Ok(0)
            }
        })
    }

    /// Compacts the index unconditionally.
    pub fn compact(&self) -> Result<usize> {
        self.entry.with_index_mut(TenantIndex::compact)
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Result<IndexStats> {
        self.entry.with_index(|index| Ok(index.stats()))
    }

    /// Marks the index as diverged from the catalog.
    ///
    /// The in-memory structure is dropped; the next acquisition rebuilds it
    /// from the catalog.
    pub fn mark_corrupted(&self, reason: &str) {
        error!(tenant = %self.entry.tenant_id, reason, "Tenant index diverged from catalog, forcing rebuild");
        self.entry.clear_index();
        let mut state = self.entry.lock_state_recover();
        state.phase = Phase::Corrupted;
    }

    /// Drops the in-memory index; the next acquisition reloads it.
    pub fn discard(self) {
        self.entry.clear_index();
        let mut state = self.entry.lock_state_recover();
        state.phase = Phase::Unloaded;
    }

    /// Releases the handle.
    pub fn release(self) {}
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        let mut state = self.entry.lock_state_recover();
        state.writer = false;
        state.touch();
        drop(state);
        self.entry.changed.notify_all();
    }
}
