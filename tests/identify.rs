//! Integration tests for identification.
//!
//! These tests verify:
//! - Per-vector nearest-neighbor matching with near-duplicate identities
//! - Empty-tenant and no-face outcomes are not errors
//! - Tenant isolation and camera ownership
//! - Access log persistence and the live feed

mod common;

use std::time::Duration;

use common::*;
use facegate::{CameraRole, GateError, InputError, NotFoundError, ResourceError, TenantSettings, Timestamp};

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_near_duplicate_identities_resolved_per_vector() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "Acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    let jane = gate.create_identity(acme, "Jane Smith").unwrap();

    let v1 = axis(0);
    let v2 = near_axis0(0.99);
    gate.enroll_reference(acme, john, &portrait(&v1)).unwrap();
    gate.enroll_reference(acme, jane, &portrait(&v2)).unwrap();

    let result = gate.identify(acme, camera, &portrait(&v1)).unwrap();
    let face = &result.faces[0];
    assert_eq!(face.identity_id, Some(john));
    assert!((face.similarity - 1.0).abs() < 1e-5);

    let result = gate.identify(acme, camera, &portrait(&v2)).unwrap();
    assert_eq!(result.faces[0].identity_id, Some(jane));
}

#[test]
fn test_top_k_candidates_ranked() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    let jane = gate.create_identity(acme, "Jane Smith").unwrap();
    gate.enroll_vector(acme, john, &axis(0)).unwrap();
    gate.enroll_vector(acme, jane, &near_axis0(0.9)).unwrap();
    gate.update_tenant_settings(
        acme,
        TenantSettings {
            similarity_threshold: 0.8,
            top_k: 5,
        },
    )
    .unwrap();

    let result = gate.identify(acme, camera, &portrait(&axis(0))).unwrap();
    let candidates = &result.faces[0].candidates;
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].identity_id, john);
    assert_eq!(candidates[1].identity_id, jane);
    assert!(candidates[0].similarity > candidates[1].similarity);
}

#[test]
fn test_threshold_change_applies_to_later_calls() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    gate.enroll_vector(acme, john, &axis(0)).unwrap();

    let probe = portrait(&near_axis0(0.7));
    assert!(!gate.identify(acme, camera, &probe).unwrap().faces[0].is_match());

    gate.update_tenant_settings(
        acme,
        TenantSettings {
            similarity_threshold: 0.6,
            top_k: 1,
        },
    )
    .unwrap();
    assert!(gate.identify(acme, camera, &probe).unwrap().faces[0].is_match());
}

// ============================================================================
// Empty outcomes
// ============================================================================

#[test]
fn test_empty_tenant_returns_no_match_without_error() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");

    let result = gate.identify(acme, camera, &portrait(&axis(3))).unwrap();
    assert_eq!(result.matches().count(), 0);
    assert_eq!(result.faces.len(), 1);
    assert_eq!(result.faces[0].similarity, 0.0);
    assert!(result.faces[0].candidates.is_empty());
}

#[test]
fn test_no_face_returns_empty_and_logs_nothing() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");

    let result = gate.identify(acme, camera, &frame(&[])).unwrap();
    assert!(result.is_empty());
    assert!(gate.access_log(acme, None, 100).unwrap().is_empty());
}

// ============================================================================
// Isolation and ownership
// ============================================================================

#[test]
fn test_tenants_are_isolated() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, _) = site(&gate, "acme");
    let (globex, globex_camera) = site(&gate, "globex");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    gate.enroll_vector(acme, john, &axis(0)).unwrap();

    let result = gate
        .identify(globex, globex_camera, &portrait(&axis(0)))
        .unwrap();
    assert!(!result.faces[0].is_match());
    assert!(result.faces[0].candidates.is_empty());
}

#[test]
fn test_camera_of_other_tenant_rejected() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, _) = site(&gate, "acme");
    let (_, globex_camera) = site(&gate, "globex");

    let err = gate
        .identify(acme, globex_camera, &portrait(&axis(0)))
        .unwrap_err();
    assert!(matches!(err, GateError::NotFound(NotFoundError::Camera(_))));
}

#[test]
fn test_unknown_tenant_rejected() {
    let (gate, _catalog, _model) = memory_gate();
    let (_, camera) = site(&gate, "acme");
    let err = gate
        .identify(facegate::TenantId::new(), camera, &portrait(&axis(0)))
        .unwrap_err();
    assert!(matches!(err, GateError::NotFound(NotFoundError::Tenant(_))));
}

#[test]
fn test_deleted_tenant_not_found() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    gate.enroll_vector(acme, john, &axis(0)).unwrap();
    gate.identify(acme, camera, &portrait(&axis(0))).unwrap();

    gate.delete_tenant(acme).unwrap();
    assert!(gate
        .identify(acme, camera, &portrait(&axis(0)))
        .unwrap_err()
        .is_not_found());
    assert!(gate.index_stats(acme).unwrap_err().is_not_found());
    // History survives the tenant.
    assert_eq!(gate.access_log(acme, None, 10).unwrap().len(), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_model_unavailable_aborts() {
    let (gate, _catalog, model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    model.set_offline(true);

    let err = gate.identify(acme, camera, &portrait(&axis(0))).unwrap_err();
    assert!(matches!(
        err,
        GateError::Resource(ResourceError::ModelUnavailable(_))
    ));
    assert!(gate.access_log(acme, None, 10).unwrap().is_empty());
}

#[test]
fn test_invalid_image_is_input_error() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let err = gate.identify(acme, camera, b"not a frame").unwrap_err();
    assert!(matches!(err, GateError::Input(InputError::InvalidImage(_))));
}

#[test]
fn test_catalog_offline_aborts() {
    let (gate, catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    catalog.set_offline(true);

    let err = gate.identify(acme, camera, &portrait(&axis(0))).unwrap_err();
    assert!(matches!(
        err,
        GateError::Resource(ResourceError::CatalogUnavailable(_))
    ));
}

// ============================================================================
// Access log
// ============================================================================

#[test]
fn test_every_face_logged_matched_or_not() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let john = gate.create_identity(acme, "John Doe").unwrap();
    gate.enroll_vector(acme, john, &axis(0)).unwrap();

    let result = gate
        .identify(acme, camera, &frame(&[axis(0), axis(5), axis(9)]))
        .unwrap();
    assert_eq!(result.faces.len(), 3);
    assert_eq!(result.matches().count(), 1);

    let log = gate.access_log(acme, None, 10).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.iter().filter(|e| e.is_match()).count(), 1);
    for entry in &log {
        assert_eq!(entry.camera_id, camera);
        assert!(entry.processing_time_ms >= 0.0);
        assert!(result.faces.iter().any(|f| f.access_log_id == entry.id));
    }
}

#[test]
fn test_access_log_since_and_limit() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");

    gate.identify(acme, camera, &portrait(&axis(0))).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let cutoff = Timestamp::now();
    std::thread::sleep(Duration::from_millis(5));
    gate.identify(acme, camera, &portrait(&axis(1))).unwrap();
    gate.identify(acme, camera, &portrait(&axis(2))).unwrap();

    assert_eq!(gate.access_log(acme, None, 10).unwrap().len(), 3);
    assert_eq!(gate.access_log(acme, Some(cutoff), 10).unwrap().len(), 2);
    assert_eq!(gate.access_log(acme, None, 2).unwrap().len(), 2);

    let log = gate.access_log(acme, None, 10).unwrap();
    assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_camera_deletion_keeps_history() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    gate.identify(acme, camera, &portrait(&axis(0))).unwrap();

    gate.delete_camera(camera).unwrap();
    assert_eq!(gate.access_log(acme, None, 10).unwrap().len(), 1);
    assert!(gate
        .identify(acme, camera, &portrait(&axis(0)))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_access_log_feed() {
    let (gate, _catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let exit = gate
        .register_camera(acme, "main", CameraRole::Exit, None)
        .unwrap();
    let rx = gate.subscribe_access_log(8);

    gate.identify(acme, camera, &portrait(&axis(0))).unwrap();
    gate.identify(acme, exit, &portrait(&axis(1))).unwrap();

    let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.camera_id, camera);
    assert_eq!(second.camera_id, exit);
}

#[test]
fn test_access_log_append_failure_aborts_identify() {
    let (gate, catalog, _model) = memory_gate();
    let (acme, camera) = site(&gate, "acme");
    let rx = gate.subscribe_access_log(8);
    catalog.fail_next_access_log_appends(1);

    let err = gate.identify(acme, camera, &portrait(&axis(0))).unwrap_err();
    assert!(err.is_retryable());
    assert!(rx.try_recv().is_err());
}
