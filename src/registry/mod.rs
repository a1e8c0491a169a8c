//! Per-tenant index registry.
//!
//! The registry owns one [`TenantIndex`] per tenant, loaded lazily from the
//! catalog on first access. Callers never touch an index directly: they
//! acquire a [`ReadHandle`] (shared) or a [`WriteHandle`] (exclusive), and
//! the handle is released when dropped.
//!
//! # Lifecycle
//!
//! ```text
//! Unloaded -> Loading -> Ready <-> {Reading, Writing}
//! Ready -> Unloaded            (evict, idle eviction, discard)
//! Writing -> Corrupted         (mark_corrupted)
//! Corrupted -> Loading         (next acquisition)
//! ```
//!
//! Loading happens outside the registry lock. While one caller loads a
//! tenant, other callers for that tenant wait; callers for other tenants
//! are not affected. Waiters are granted in no particular order.
//!
//! Entries for tenants that are not loaded and have no handles are dropped
//! from the registry, so it only tracks tenants in use. Slot ids stay unique
//! across reloads: every index that leaves memory raises a registry-wide
//! slot watermark, and reloaded indexes start numbering above it.
//!
//! # Cancellation
//!
//! Pending acquisitions take a [`CancelToken`]. The token is checked before
//! a handle is granted and on every poll interval; once cancelled the
//! acquisition returns `ResourceError::Cancelled`. Work that has already
//! started (a model call, a granted handle) is not interrupted.

mod handle;

pub use handle::{ReadHandle, WriteHandle};
pub use tokio_util::sync::CancellationToken as CancelToken;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::{IndexConfig, RegistryConfig};
use crate::error::{ConsistencyError, GateError, NotFoundError, ResourceError, Result};
use crate::index::{IndexStats, TenantIndex};
use crate::types::TenantId;

/// Observable state of a tenant index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// Not in memory; the next acquisition loads it.
    Unloaded,
    /// Being built from the catalog.
    Loading,
    /// In memory with no outstanding handles.
    Ready,
    /// In memory with this many read handles outstanding.
    Reading(usize),
    /// In memory with a write handle outstanding.
    Writing,
    /// Diverged from the catalog; the next acquisition rebuilds it.
    Corrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Unloaded,
    Loading,
    Ready,
    Corrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug)]
pub(crate) struct EntryState {
    pub(crate) phase: Phase,
    pub(crate) readers: usize,
    pub(crate) writer: bool,
    last_access: Instant,
}

impl EntryState {
    pub(crate) fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer
    }

    fn observed(&self) -> IndexState {
        match self.phase {
            Phase::Unloaded => IndexState::Unloaded,
            Phase::Loading => IndexState::Loading,
            Phase::Corrupted => IndexState::Corrupted,
            Phase::Ready if self.writer => IndexState::Writing,
            Phase::Ready if self.readers > 0 => IndexState::Reading(self.readers),
            Phase::Ready => IndexState::Ready,
        }
    }
}

/// One tenant's slot in the registry.
#[derive(Debug)]
pub(crate) struct TenantEntry {
    pub(crate) tenant_id: TenantId,
    state: Mutex<EntryState>,
    pub(crate) changed: Condvar,
    index: RwLock<Option<TenantIndex>>,
    slot_floor: Arc<AtomicU64>,
}

impl TenantEntry {
    fn new(tenant_id: TenantId, slot_floor: Arc<AtomicU64>) -> Self {
        Self {
            tenant_id,
            state: Mutex::new(EntryState {
                phase: Phase::Unloaded,
                readers: 0,
                writer: false,
                last_access: Instant::now(),
            }),
            changed: Condvar::new(),
            index: RwLock::new(None),
            slot_floor,
        }
    }

    /// Locks the state, recovering from poisoning. Handle counts must stay
    /// accurate even after a panic elsewhere.
    pub(crate) fn lock_state_recover(&self) -> MutexGuard<'_, EntryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn with_index<R>(&self, f: impl FnOnce(&TenantIndex) -> Result<R>) -> Result<R> {
        let guard = self
            .index
            .read()
            .map_err(|_| ConsistencyError::LockPoisoned("tenant index"))?;
        match guard.as_ref() {
            Some(index) => f(index),
            None => Err(GateError::index(format!(
                "index for tenant {} is not loaded",
                self.tenant_id
            ))),
        }
    }

    pub(crate) fn with_index_mut<R>(
        &self,
        f: impl FnOnce(&mut TenantIndex) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self
            .index
            .write()
            .map_err(|_| ConsistencyError::LockPoisoned("tenant index"))?;
        match guard.as_mut() {
            Some(index) => f(index),
            None => Err(GateError::index(format!(
                "index for tenant {} is not loaded",
                self.tenant_id
            ))),
        }
    }

    pub(crate) fn clear_index(&self) {
        self.replace_index(None);
    }

    fn install(&self, index: TenantIndex) {
        self.replace_index(Some(index));
    }

    /// Swaps the in-memory index, raising the slot watermark past every
    /// slot the outgoing one issued.
    fn replace_index(&self, index: Option<TenantIndex>) {
        let mut guard = self
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = std::mem::replace(&mut *guard, index) {
            self.slot_floor.fetch_max(old.next_slot(), Ordering::SeqCst);
        }
    }
}

/// Registry of lazily loaded tenant indexes.
///
/// # Thread Safety
///
/// `TenantIndexRegistry` is `Send + Sync`. Handles may be held across
/// threads and are released on drop.
pub struct TenantIndexRegistry {
    catalog: Arc<dyn Catalog>,
    index_config: IndexConfig,
    config: RegistryConfig,
    entries: Mutex<HashMap<TenantId, Arc<TenantEntry>>>,
    slot_floor: Arc<AtomicU64>,
}

impl std::fmt::Debug for TenantIndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tenants = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("TenantIndexRegistry")
            .field("tenants", &tenants)
            .field("config", &self.config)
            .finish()
    }
}

impl TenantIndexRegistry {
    /// Creates an empty registry backed by `catalog`.
    pub fn new(catalog: Arc<dyn Catalog>, index_config: IndexConfig, config: RegistryConfig) -> Self {
        Self {
            catalog,
            index_config,
            config,
            entries: Mutex::new(HashMap::new()),
            slot_floor: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of tenants the registry currently tracks: loaded, loading,
    /// corrupted, or with handles outstanding.
    pub fn tracked_tenants(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Acquires shared access to a tenant's index, loading it if needed.
    ///
    /// # Errors
    ///
    /// - [`NotFoundError::Tenant`] if the tenant is not in the catalog
    /// - [`ResourceError::TimedOut`] if the configured acquire timeout passes
    /// - any catalog error raised while loading
    pub fn acquire_read(&self, tenant_id: TenantId) -> Result<ReadHandle> {
        self.acquire_read_cancellable(tenant_id, &CancelToken::new())
    }

    /// Like [`acquire_read`](Self::acquire_read), abandoning the wait with
    /// [`ResourceError::Cancelled`] once `cancel` is set.
    pub fn acquire_read_cancellable(
        &self,
        tenant_id: TenantId,
        cancel: &CancelToken,
    ) -> Result<ReadHandle> {
        let entry = self.acquire(tenant_id, Mode::Read, cancel, true)?;
        Ok(ReadHandle::new(entry.ok_or_else(|| {
            NotFoundError::tenant(tenant_id)
        })?))
    }

    /// Acquires exclusive access to a tenant's index, loading it if needed.
    ///
    /// Waits until every outstanding handle for the tenant is released.
    pub fn acquire_write(&self, tenant_id: TenantId) -> Result<WriteHandle> {
        self.acquire_write_cancellable(tenant_id, &CancelToken::new())
    }

    /// Like [`acquire_write`](Self::acquire_write), abandoning the wait
    /// with [`ResourceError::Cancelled`] once `cancel` is set.
    pub fn acquire_write_cancellable(
        &self,
        tenant_id: TenantId,
        cancel: &CancelToken,
    ) -> Result<WriteHandle> {
        let entry = self.acquire(tenant_id, Mode::Write, cancel, true)?;
        Ok(WriteHandle::new(entry.ok_or_else(|| {
            NotFoundError::tenant(tenant_id)
        })?))
    }

    /// Acquires exclusive access only if the index is in memory.
    ///
    /// Returns `None` for an unloaded or corrupted index: the next load
    /// reads the catalog, so there is nothing to update.
    pub fn acquire_write_if_loaded(&self, tenant_id: TenantId) -> Result<Option<WriteHandle>> {
        let entry = self.acquire(tenant_id, Mode::Write, &CancelToken::new(), false)?;
        Ok(entry.map(WriteHandle::new))
    }

    /// Rebuilds a tenant's index from the catalog.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn rebuild(&self, tenant_id: TenantId) -> Result<IndexStats> {
        let handle = self.acquire_write(tenant_id)?;
        let entries = self.catalog.load_tenant_vectors(tenant_id)?;
        let loaded = handle.rebuild_from(entries)?;
        info!(loaded, "Tenant index rebuilt");
        handle.stats()
    }

    /// Current state of a tenant's index.
    pub fn state(&self, tenant_id: TenantId) -> IndexState {
        let entry = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(&tenant_id).cloned()
        };
        match entry {
            Some(entry) => entry.lock_state_recover().observed(),
            None => IndexState::Unloaded,
        }
    }

    /// Tenants whose index is currently in memory.
    pub fn loaded_tenants(&self) -> Vec<TenantId> {
        let entries: Vec<Arc<TenantEntry>> = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut loaded: Vec<TenantId> = entries
            .iter()
            .filter(|e| e.lock_state_recover().phase == Phase::Ready)
            .map(|e| e.tenant_id)
            .collect();
        loaded.sort();
        loaded
    }

    /// Drops a tenant's index from memory.
    ///
    /// Returns `false` if the index was not loaded.
    ///
    /// # Errors
    ///
    /// [`ResourceError::TenantBusy`] if handles are outstanding or the
    /// index is loading.
    pub fn evict(&self, tenant_id: TenantId) -> Result<bool> {
        let entry = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(&tenant_id).cloned()
        };
        let Some(entry) = entry else {
            return Ok(false);
        };

        let mut state = entry.lock_state_recover();
        if state.phase == Phase::Loading || !state.is_idle() {
            return Err(ResourceError::TenantBusy(tenant_id.to_string()).into());
        }
        let evicted = state.phase != Phase::Unloaded;
        if evicted {
            entry.clear_index();
            state.phase = Phase::Unloaded;
        }
        drop(state);
        entry.changed.notify_all();
        drop(entry);
        self.prune(tenant_id);

        if evicted {
            info!(tenant = %tenant_id, "Tenant index evicted");
        }
        Ok(evicted)
    }

    /// Evicts every ready index unused for longer than the configured idle
    /// period. Returns the number evicted.
    pub fn evict_idle(&self) -> usize {
        let Some(idle) = self.config.idle_eviction() else {
            return 0;
        };
        let entries: Vec<Arc<TenantEntry>> = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut evicted = 0;
        for entry in &entries {
            let mut state = entry.lock_state_recover();
            if state.phase == Phase::Ready && state.is_idle() && state.last_access.elapsed() >= idle
            {
                entry.clear_index();
                state.phase = Phase::Unloaded;
                evicted += 1;
                debug!(tenant = %entry.tenant_id, "Idle tenant index evicted");
            }
        }
        drop(entries);
        self.prune_all();

        if evicted > 0 {
            info!(evicted, "Idle tenant indexes evicted");
        }
        evicted
    }

    /// Waits for outstanding handles, then forgets the tenant.
    ///
    /// Used after a tenant is deleted from the catalog.
    pub fn invalidate(&self, tenant_id: TenantId) -> Result<()> {
        if let Some(handle) = self.acquire_write_if_loaded(tenant_id)? {
            handle.discard();
        }
        self.prune(tenant_id);
        Ok(())
    }

    /// Forgets a tenant's entry if it is unloaded and nobody else holds it.
    ///
    /// Entries are only cloned out under the map lock, so a strong count of
    /// one seen under that lock means no handle or pending acquisition
    /// refers to the entry.
    fn prune(&self, tenant_id: TenantId) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.get(&tenant_id).is_some_and(|entry| is_unused(entry)) {
            entries.remove(&tenant_id);
        }
    }

    /// Forgets every unloaded entry nobody holds.
    fn prune_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|_, entry| !is_unused(entry));
    }

    fn entry(&self, tenant_id: TenantId) -> Arc<TenantEntry> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            entries.entry(tenant_id).or_insert_with(|| {
                Arc::new(TenantEntry::new(tenant_id, Arc::clone(&self.slot_floor)))
            }),
        )
    }

    /// Core acquisition loop.
    ///
    /// With `load` false, an unloaded or corrupted index yields `Ok(None)`
    /// instead of being loaded.
    fn acquire(
        &self,
        tenant_id: TenantId,
        mode: Mode,
        cancel: &CancelToken,
        load: bool,
    ) -> Result<Option<Arc<TenantEntry>>> {
        let entry = self.entry(tenant_id);
        let deadline = self.config.acquire_timeout().map(|t| Instant::now() + t);
        let poll = self.config.poll_interval();

        let mut state = entry.lock_state_recover();
        loop {
            if cancel.is_cancelled() {
                debug!(tenant = %tenant_id, "Handle acquisition cancelled");
                drop(state);
                drop(entry);
                self.prune(tenant_id);
                return Err(ResourceError::Cancelled.into());
            }
            match state.phase {
                Phase::Unloaded | Phase::Corrupted if !load => {
                    drop(state);
                    drop(entry);
                    self.prune(tenant_id);
                    return Ok(None);
                }
                Phase::Unloaded | Phase::Corrupted if state.is_idle() => {
                    let previous = state.phase;
                    state.phase = Phase::Loading;
                    drop(state);

                    let loaded = self.load(tenant_id);

                    state = entry.lock_state_recover();
                    match loaded {
                        Ok(index) => {
                            entry.install(index);
                            state.phase = Phase::Ready;
                            state.touch();
                            entry.changed.notify_all();
                            continue;
                        }
                        Err(err) => {
                            state.phase = previous;
                            drop(state);
                            entry.changed.notify_all();
                            drop(entry);
                            self.prune(tenant_id);
                            return Err(err);
                        }
                    }
                }
                Phase::Ready => {
                    let granted = match mode {
                        Mode::Read => !state.writer,
                        Mode::Write => state.is_idle(),
                    };
                    if granted {
                        match mode {
                            Mode::Read => state.readers += 1,
                            Mode::Write => state.writer = true,
                        }
                        state.touch();
                        drop(state);
                        return Ok(Some(entry));
                    }
                }
                Phase::Unloaded | Phase::Corrupted | Phase::Loading => {}
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(tenant = %tenant_id, ?mode, "Handle acquisition timed out");
                        drop(state);
                        drop(entry);
                        self.prune(tenant_id);
                        return Err(ResourceError::TimedOut.into());
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            state = entry
                .changed
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    fn load(&self, tenant_id: TenantId) -> Result<TenantIndex> {
        let started = Instant::now();
        let tenant = self
            .catalog
            .get_tenant(tenant_id)?
            .ok_or_else(|| NotFoundError::tenant(tenant_id))?;
        let entries = self.catalog.load_tenant_vectors(tenant_id)?;
        let mut index = TenantIndex::resume(
            tenant_id,
            tenant.embedding_dimension,
            self.index_config.clone(),
            self.slot_floor.load(Ordering::SeqCst),
        );
        index.rebuild_from(entries)?;
        info!(
            vectors = index.len(),
            backend = %index.backend_kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tenant index loaded"
        );
        Ok(index)
    }
}

fn is_unused(entry: &Arc<TenantEntry>) -> bool {
    Arc::strong_count(entry) == 1 && entry.lock_state_recover().phase == Phase::Unloaded
}
