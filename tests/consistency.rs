//! Integration tests for catalog/index consistency.
//!
//! These tests verify:
//! - An index insert failing after a durable catalog append marks the
//!   index corrupted, and the next access rebuilds it from the catalog
//! - A catalog delete whose index update fails leaves a transient
//!   dangling slot that a rebuild clears
//! - The index can always be reconstructed from the catalog alone

mod common;

use std::sync::Arc;

use common::*;
use facegate::catalog::{Catalog, Identity, MemoryCatalog, Tenant};
use facegate::embedding::EmbeddingCapability;
use facegate::registry::{CancelToken, TenantIndexRegistry};
use facegate::{
    Camera, CameraRole, EnrollmentCoordinator, FaceGate, IndexConfig, IndexState, RegistryConfig,
};

/// Builds a gate whose tenant record claims a different dimension than the
/// configured one, so catalog appends succeed and index inserts fail.
fn misconfigured_site() -> (FaceGate, Arc<MemoryCatalog>, Tenant, facegate::CameraId) {
    let (gate, catalog, _model) = memory_gate();
    let tenant = Tenant::new("acme", DIM / 2).unwrap();
    catalog.create_tenant(&tenant).unwrap();
    let camera = Camera::new(tenant.id, "main", CameraRole::Entry, None).unwrap();
    catalog.register_camera(&camera).unwrap();
    (gate, catalog, tenant, camera.id)
}

#[test]
fn test_insert_failure_after_append_marks_corrupted() {
    let (gate, catalog, tenant, _camera) = misconfigured_site();
    let john = gate.create_identity(tenant.id, "John Doe").unwrap();

    // The catalog write succeeded, so the enrollment is reported as done.
    let reference = gate
        .enroll_reference(tenant.id, john, &portrait(&axis(0)))
        .unwrap();
    assert!(catalog.get_reference(reference).unwrap().is_some());
    assert_eq!(gate.index_state(tenant.id), IndexState::Corrupted);

    // Next access rebuilds from the catalog; the bad entry is skipped.
    let stats = gate.index_stats(tenant.id).unwrap();
    assert_eq!(gate.index_state(tenant.id), IndexState::Ready);
    assert_eq!(stats.live, 0);
    assert_eq!(stats.generation, 1);
}

#[test]
fn test_corrupted_index_heals_once_configuration_fixed() {
    let (gate, catalog, tenant, camera) = misconfigured_site();
    let john = gate.create_identity(tenant.id, "John Doe").unwrap();
    gate.enroll_reference(tenant.id, john, &portrait(&axis(0)))
        .unwrap();
    assert_eq!(gate.index_state(tenant.id), IndexState::Corrupted);

    let mut fixed = catalog.get_tenant(tenant.id).unwrap().unwrap();
    fixed.embedding_dimension = DIM;
    catalog.update_tenant(&fixed).unwrap();

    let result = gate
        .identify(tenant.id, camera, &portrait(&axis(0)))
        .unwrap();
    assert_eq!(result.faces[0].identity_id, Some(john));
    assert_eq!(gate.index_stats(tenant.id).unwrap().live, 1);
}

#[test]
fn test_failed_catalog_append_has_no_side_effect() {
    let (gate, catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    let before = gate.index_stats(acme).unwrap();

    catalog.fail_next_reference_appends(1);
    let err = gate
        .enroll_reference(acme, john, &portrait(&axis(0)))
        .unwrap_err();
    assert!(err.is_retryable());

    let after = gate.index_stats(acme).unwrap();
    assert_eq!(after, before);
    assert!(!gate
        .identify(acme, camera, &portrait(&axis(0)))
        .unwrap()
        .faces[0]
        .is_match());
}

#[test]
fn test_dangling_slot_is_transient() {
    let catalog = Arc::new(MemoryCatalog::new());
    let tenant = Tenant::new("acme", DIM).unwrap();
    catalog.create_tenant(&tenant).unwrap();
    let identity = Identity::new(tenant.id, "John Doe").unwrap();
    catalog.create_identity(&identity).unwrap();

    let registry = Arc::new(TenantIndexRegistry::new(
        catalog.clone(),
        IndexConfig::default(),
        RegistryConfig {
            acquire_timeout_ms: Some(30),
            ..Default::default()
        },
    ));
    let model: Arc<dyn EmbeddingCapability> = Arc::new(ScriptedCapability::new(DIM));
    let coordinator =
        EnrollmentCoordinator::new(catalog.clone(), registry.clone(), model, DIM);

    let reference = coordinator
        .enroll_vector(tenant.id, identity.id, &axis(0), &CancelToken::new())
        .unwrap();

    // A long-running reader keeps the index from being updated.
    let reader = registry.acquire_read(tenant.id).unwrap();
    coordinator.remove_reference(reference).unwrap();
    assert!(catalog.get_reference(reference).unwrap().is_none());

    let hits = reader.search(&axis(0), 1).unwrap();
    assert_eq!(hits.len(), 1, "slot dangles until the next rebuild");
    assert_eq!(hits[0].reference_id, reference);
    drop(reader);

    registry.rebuild(tenant.id).unwrap();
    let reader = registry.acquire_read(tenant.id).unwrap();
    assert!(reader.search(&axis(0), 1).unwrap().is_empty());
}

#[test]
fn test_rebuild_reproduces_search_results() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    let jane = gate.create_identity(acme, "Jane Smith").unwrap();
    for seed in 0..10 {
        let identity = if seed % 2 == 0 { john } else { jane };
        gate.enroll_vector(acme, identity, &make_embedding(seed * 13))
            .unwrap();
    }

    let queries: Vec<_> = (0..10).map(|s| portrait(&make_embedding(s * 13 + 4))).collect();
    let run = |gate: &FaceGate| -> Vec<_> {
        queries
            .iter()
            .map(|q| {
                let face = gate.identify(acme, camera, q).unwrap().faces.remove(0);
                (face.identity_id, face.similarity, face.candidates[0].reference_id)
            })
            .collect()
    };
    let same = |a: &[(Option<facegate::IdentityId>, f32, facegate::ReferenceId)],
                b: &[(Option<facegate::IdentityId>, f32, facegate::ReferenceId)]| {
        a.iter()
            .zip(b)
            .all(|(x, y)| x.0 == y.0 && x.2 == y.2 && (x.1 - y.1).abs() < 1e-5)
    };

    let first = run(&gate);
    let stats = gate.rebuild_index(acme).unwrap();
    let second = run(&gate);
    gate.rebuild_index(acme).unwrap();
    let third = run(&gate);

    assert_eq!(stats.live, 10);
    assert!(same(&first, &second));
    assert!(same(&second, &third));
}

#[test]
fn test_eviction_reload_matches_catalog() {
    let (gate, catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    gate.enroll_vector(acme, john, &axis(4)).unwrap();

    assert!(gate.evict(acme).unwrap());
    assert_eq!(gate.index_state(acme), IndexState::Unloaded);

    // Written straight to the catalog while the index is not in memory.
    catalog
        .append_reference_vector(acme, john, &axis(7))
        .unwrap();

    let result = gate.identify(acme, camera, &portrait(&axis(7))).unwrap();
    assert_eq!(result.faces[0].identity_id, Some(john));
    assert_eq!(gate.index_stats(acme).unwrap().live, 2);
}
