//! In-process catalog.
//!
//! Keeps every record in ordered maps behind one mutex. Besides serving
//! embedded deployments and tests, it can simulate catalog outages:
//! [`set_offline`](MemoryCatalog::set_offline) makes every call fail with
//! `CatalogUnavailable`, the `fail_next_*` switches make individual
//! appends fail, and
//! [`set_reference_append_delay`](MemoryCatalog::set_reference_append_delay)
//! slows reference appends down.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::access::AccessLogEntry;
use crate::error::{ConsistencyError, GateError, InputError, NotFoundError, Result};
use crate::types::{AccessLogId, CameraId, IdentityId, ReferenceId, TenantId, Timestamp};

use super::{Camera, Catalog, Identity, ReferenceRecord, StoredVector, Tenant};

#[derive(Debug, Default)]
struct MemoryState {
    tenants: BTreeMap<TenantId, Tenant>,
    identities: BTreeMap<IdentityId, Identity>,
    references: BTreeMap<ReferenceId, (ReferenceRecord, Vec<f32>)>,
    cameras: BTreeMap<CameraId, Camera>,
    access_log: BTreeMap<(TenantId, Timestamp, AccessLogId), AccessLogEntry>,
}

/// Catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    reference_faults: Fault,
    access_log_faults: Fault,
    append_delay_ms: AtomicU64,
}

/// Injected failure switch: let `skip` calls through, then fail `fail`.
#[derive(Debug, Default)]
struct Fault {
    skip: AtomicUsize,
    fail: AtomicUsize,
}

impl Fault {
    fn arm(&self, skip: usize, fail: usize) {
        self.skip.store(skip, Ordering::SeqCst);
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if self
            .skip
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(());
        }
        if self
            .fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GateError::catalog_unavailable(format!(
                "injected {} failure",
                what
            )));
        }
        Ok(())
    }
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the catalog becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` reference vector appends fail with
    /// `CatalogUnavailable`.
    pub fn fail_next_reference_appends(&self, count: usize) {
        self.reference_faults.arm(0, count);
    }

    /// Lets `successes` reference vector appends through, then makes the
    /// following one fail.
    pub fn fail_reference_append_after(&self, successes: usize) {
        self.reference_faults.arm(successes, 1);
    }

    /// Makes every reference vector append take at least `delay`.
    pub fn set_reference_append_delay(&self, delay: Duration) {
        self.append_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes the next `count` access log appends fail with
    /// `CatalogUnavailable`.
    pub fn fail_next_access_log_appends(&self, count: usize) {
        self.access_log_faults.arm(0, count);
    }

    /// Number of stored reference vectors across all tenants.
    pub fn reference_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.references.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().references.len())
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GateError::catalog_unavailable("memory catalog is offline"));
        }
        self.state
            .lock()
            .map_err(|_| ConsistencyError::LockPoisoned("memory catalog").into())
    }
}

impl Catalog for MemoryCatalog {
    fn path(&self) -> Option<&Path> {
        None
    }

    fn tenant_exists(&self, id: TenantId) -> Result<bool> {
        Ok(self.state()?.tenants.contains_key(&id))
    }

    fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let mut state = self.state()?;
        if state.tenants.values().any(|t| t.name == tenant.name) {
            return Err(InputError::already_exists(format!("tenant '{}'", tenant.name)).into());
        }
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self.state()?.tenants.get(&id).cloned())
    }

    fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        Ok(self
            .state()?
            .tenants
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.state()?.tenants.values().cloned().collect())
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        let mut state = self.state()?;
        let existing = state
            .tenants
            .get_mut(&tenant.id)
            .ok_or_else(|| NotFoundError::tenant(tenant.id))?;
        if existing.name != tenant.name {
            return Err(InputError::invalid_field("name", "tenant names are immutable").into());
        }
        *existing = tenant.clone();
        Ok(())
    }

    fn delete_tenant(&self, id: TenantId) -> Result<bool> {
        let mut state = self.state()?;
        if state.tenants.remove(&id).is_none() {
            return Ok(false);
        }
        state.identities.retain(|_, i| i.tenant_id != id);
        state.references.retain(|_, (r, _)| r.tenant_id != id);
        state.cameras.retain(|_, c| c.tenant_id != id);
        Ok(true)
    }

    fn create_identity(&self, identity: &Identity) -> Result<()> {
        let mut state = self.state()?;
        if !state.tenants.contains_key(&identity.tenant_id) {
            return Err(NotFoundError::tenant(identity.tenant_id).into());
        }
        let taken = state
            .identities
            .values()
            .any(|i| i.tenant_id == identity.tenant_id && i.full_name == identity.full_name);
        if taken {
            return Err(
                InputError::already_exists(format!("identity '{}'", identity.full_name)).into(),
            );
        }
        state.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        Ok(self.state()?.identities.get(&id).cloned())
    }

    fn list_identities(&self, tenant_id: TenantId) -> Result<Vec<Identity>> {
        Ok(self
            .state()?
            .identities
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn delete_identity(&self, id: IdentityId) -> Result<Option<Vec<ReferenceId>>> {
        let mut state = self.state()?;
        if state.identities.remove(&id).is_none() {
            return Ok(None);
        }
        let removed: Vec<ReferenceId> = state
            .references
            .iter()
            .filter(|(_, (r, _))| r.identity_id == id)
            .map(|(rid, _)| *rid)
            .collect();
        for rid in &removed {
            state.references.remove(rid);
        }
        Ok(Some(removed))
    }

    fn load_tenant_vectors(&self, tenant_id: TenantId) -> Result<Vec<StoredVector>> {
        Ok(self
            .state()?
            .references
            .values()
            .filter(|(r, _)| r.tenant_id == tenant_id)
            .map(|(r, v)| StoredVector {
                reference_id: r.id,
                identity_id: r.identity_id,
                vector: v.clone(),
            })
            .collect())
    }

    fn append_reference_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: &[f32],
    ) -> Result<ReferenceRecord> {
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let mut state = self.state()?;
        self.reference_faults.check("reference append")?;

        let owned = state
            .identities
            .get(&identity_id)
            .is_some_and(|i| i.tenant_id == tenant_id);
        if !owned {
            return Err(NotFoundError::identity(identity_id).into());
        }

        let record = ReferenceRecord {
            id: ReferenceId::new(),
            tenant_id,
            identity_id,
            dimension: vector.len(),
            enrolled_at: Timestamp::now(),
        };
        state
            .references
            .insert(record.id, (record.clone(), vector.to_vec()));
        Ok(record)
    }

    fn get_reference(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>> {
        Ok(self.state()?.references.get(&id).map(|(r, _)| r.clone()))
    }

    fn list_references(&self, identity_id: IdentityId) -> Result<Vec<ReferenceRecord>> {
        Ok(self
            .state()?
            .references
            .values()
            .filter(|(r, _)| r.identity_id == identity_id)
            .map(|(r, _)| r.clone())
            .collect())
    }

    fn delete_reference_vector(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>> {
        Ok(self.state()?.references.remove(&id).map(|(r, _)| r))
    }

    fn register_camera(&self, camera: &Camera) -> Result<()> {
        let mut state = self.state()?;
        if !state.tenants.contains_key(&camera.tenant_id) {
            return Err(NotFoundError::tenant(camera.tenant_id).into());
        }
        let taken = state.cameras.values().any(|c| {
            c.tenant_id == camera.tenant_id && c.gate == camera.gate && c.role == camera.role
        });
        if taken {
            return Err(InputError::already_exists(format!(
                "camera for gate '{}' ({})",
                camera.gate, camera.role
            ))
            .into());
        }
        state.cameras.insert(camera.id, camera.clone());
        Ok(())
    }

    fn get_camera(&self, id: CameraId) -> Result<Option<Camera>> {
        Ok(self.state()?.cameras.get(&id).cloned())
    }

    fn list_cameras(&self, tenant_id: TenantId) -> Result<Vec<Camera>> {
        Ok(self
            .state()?
            .cameras
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn delete_camera(&self, id: CameraId) -> Result<bool> {
        Ok(self.state()?.cameras.remove(&id).is_some())
    }

    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<()> {
        let mut state = self.state()?;
        self.access_log_faults.check("access log append")?;
        state
            .access_log
            .insert((entry.tenant_id, entry.timestamp, entry.id), entry.clone());
        Ok(())
    }

    fn list_access_log(
        &self,
        tenant_id: TenantId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<AccessLogEntry>> {
        let since = since.unwrap_or(Timestamp::from_millis(i64::MIN));
        let start = (tenant_id, since, AccessLogId::nil());
        Ok(self
            .state()?
            .access_log
            .range(start..)
            .take_while(|((t, _, _), _)| *t == tenant_id)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
