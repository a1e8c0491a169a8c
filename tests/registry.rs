//! Integration tests for tenant index arbitration.
//!
//! These tests verify:
//! - Concurrent identification during enrollment never sees a partial vector
//! - Different tenants proceed independently
//! - Pending acquisitions can be cancelled or time out
//! - Eviction respects outstanding handles

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use facegate::catalog::{Catalog, MemoryCatalog, Tenant};
use facegate::registry::{CancelToken, TenantIndexRegistry};
use facegate::{GateError, IndexConfig, IndexState, RegistryConfig, ResourceError};

const ENROLLERS: usize = 6;
const IDENTIFIERS: usize = 8;

#[test]
fn test_concurrent_identify_and_enroll_never_torn() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let identities: Vec<_> = (0..ENROLLERS)
        .map(|i| gate.create_identity(acme, &format!("person {i}")).unwrap())
        .collect();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..IDENTIFIERS {
            s.spawn(|| {
                let mut round = 0usize;
                while !done.load(Ordering::SeqCst) || round < ENROLLERS {
                    let i = round % ENROLLERS;
                    let result = gate.identify(acme, camera, &portrait(&axis(i))).unwrap();
                    let face = &result.faces[0];
                    match face.identity_id {
                        Some(id) => {
                            assert_eq!(id, identities[i]);
                            assert!(face.similarity > 0.999, "torn vector: {}", face.similarity);
                        }
                        None => assert!(face.similarity < 0.5),
                    }
                    round += 1;
                }
            });
        }

        let enrollers: Vec<_> = identities
            .iter()
            .enumerate()
            .map(|(i, &identity)| {
                let gate = &gate;
                s.spawn(move || {
                    thread::sleep(Duration::from_millis(2 * i as u64));
                    gate.enroll_reference(acme, identity, &portrait(&axis(i)))
                        .unwrap();
                })
            })
            .collect();
        for enroller in enrollers {
            enroller.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    for (i, identity) in identities.iter().enumerate() {
        let result = gate.identify(acme, camera, &portrait(&axis(i))).unwrap();
        assert_eq!(result.faces[0].identity_id, Some(*identity));
    }
    assert_eq!(gate.index_stats(acme).unwrap().live, ENROLLERS);
    assert_eq!(gate.index_state(acme), IndexState::Ready);
}

#[test]
fn test_tenants_proceed_in_parallel() {
    let (gate, _catalog, _model) = memory_gate();
    let tenants: Vec<_> = (0..4).map(|i| site(&gate, &format!("tenant-{i}"))).collect();

    thread::scope(|s| {
        for &(tenant, camera) in &tenants {
            let gate = &gate;
            s.spawn(move || {
                let identity = gate.create_identity(tenant, "Only Person").unwrap();
                for seed in 0..5 {
                    gate.enroll_vector(tenant, identity, &make_embedding(seed * 7))
                        .unwrap();
                }
                let result = gate
                    .identify(tenant, camera, &portrait(&make_embedding(14)))
                    .unwrap();
                assert_eq!(result.faces[0].identity_id, Some(identity));
            });
        }
    });

    for &(tenant, _) in &tenants {
        assert_eq!(gate.index_stats(tenant).unwrap().live, 5);
    }
}

// ============================================================================
// Registry-level arbitration
// ============================================================================

fn registry(config: RegistryConfig) -> (Arc<TenantIndexRegistry>, Arc<MemoryCatalog>, Tenant) {
    let catalog = Arc::new(MemoryCatalog::new());
    let tenant = Tenant::new("acme", DIM).unwrap();
    catalog.create_tenant(&tenant).unwrap();
    let registry = Arc::new(TenantIndexRegistry::new(
        catalog.clone(),
        IndexConfig::default(),
        config,
    ));
    (registry, catalog, tenant)
}

#[test]
fn test_cancel_abandons_pending_write() {
    let (registry, _catalog, tenant) = registry(RegistryConfig {
        acquire_timeout_ms: None,
        ..Default::default()
    });
    let reader = registry.acquire_read(tenant.id).unwrap();

    let cancel = CancelToken::new();
    let waiter = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        thread::spawn(move || registry.acquire_write_cancellable(tenant.id, &cancel))
    };

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    cancel.cancel();
    let result = waiter.join().unwrap();
    assert!(matches!(
        result,
        Err(GateError::Resource(ResourceError::Cancelled))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The reader is unaffected and a later writer gets in once it leaves.
    assert_eq!(registry.state(tenant.id), IndexState::Reading(1));
    drop(reader);
    assert!(registry.acquire_write(tenant.id).is_ok());
}

#[test]
fn test_pending_read_times_out_behind_writer() {
    let (registry, _catalog, tenant) = registry(RegistryConfig {
        acquire_timeout_ms: Some(50),
        ..Default::default()
    });
    let writer = registry.acquire_write(tenant.id).unwrap();

    let err = registry.acquire_read(tenant.id).unwrap_err();
    assert!(matches!(err, GateError::Resource(ResourceError::TimedOut)));
    assert!(err.is_retryable());

    writer.release();
    assert!(registry.acquire_read(tenant.id).is_ok());
}

#[test]
fn test_eviction_requires_no_handles() {
    let (registry, _catalog, tenant) = registry(RegistryConfig::default());
    let reader = registry.acquire_read(tenant.id).unwrap();

    let err = registry.evict(tenant.id).unwrap_err();
    assert!(matches!(err, GateError::Resource(ResourceError::TenantBusy(_))));

    reader.release();
    assert!(registry.evict(tenant.id).unwrap());
    assert_eq!(registry.state(tenant.id), IndexState::Unloaded);
    assert!(registry.loaded_tenants().is_empty());
}

#[test]
fn test_idle_eviction_skips_recent_and_busy() {
    let (registry, catalog, tenant) = registry(RegistryConfig {
        idle_eviction_ms: Some(30),
        ..Default::default()
    });
    let other = Tenant::new("globex", DIM).unwrap();
    catalog.create_tenant(&other).unwrap();

    registry.acquire_read(tenant.id).unwrap().release();
    let held = registry.acquire_read(other.id).unwrap();
    thread::sleep(Duration::from_millis(60));

    assert_eq!(registry.evict_idle(), 1);
    assert_eq!(registry.state(tenant.id), IndexState::Unloaded);
    assert_eq!(registry.state(other.id), IndexState::Reading(1));
    drop(held);
}

#[test]
fn test_load_failure_returns_to_unloaded() {
    let (registry, catalog, tenant) = registry(RegistryConfig::default());
    catalog.set_offline(true);

    let err = registry.acquire_read(tenant.id).unwrap_err();
    assert!(matches!(
        err,
        GateError::Resource(ResourceError::CatalogUnavailable(_))
    ));
    assert_eq!(registry.state(tenant.id), IndexState::Unloaded);

    catalog.set_offline(false);
    assert_eq!(registry.acquire_read(tenant.id).unwrap().len().unwrap(), 0);
}

#[test]
fn test_concurrent_first_access_loads_once() {
    let (registry, catalog, tenant) = registry(RegistryConfig::default());
    let identity = facegate::Identity::new(tenant.id, "John Doe").unwrap();
    catalog.create_identity(&identity).unwrap();
    for seed in 0..20 {
        let v = make_embedding(seed);
        catalog
            .append_reference_vector(tenant.id, identity.id, &v)
            .unwrap();
    }

    let generations: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = &registry;
                s.spawn(move || {
                    let handle = registry.acquire_read(tenant.id).unwrap();
                    assert_eq!(handle.len().unwrap(), 20);
                    handle.stats().unwrap().generation
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(generations.iter().all(|&g| g == 1));
}
