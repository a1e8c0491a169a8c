//! Shared fixtures for integration tests.
//!
//! Frames are not real images: [`frame`] encodes a list of face embeddings
//! as JSON and [`ScriptedCapability`] decodes it back, so each test states
//! exactly which faces the "model" sees.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use facegate::catalog::MemoryCatalog;
use facegate::embedding::{DetectedFace, EmbeddingCapability, ModelStatus};
use facegate::{
    BoundingBox, CameraId, CameraRole, Config, EmbeddingDimension, FaceGate, GateError,
    InputError, Result, TenantId,
};
use tempfile::TempDir;

/// Embedding dimension used by integration tests.
pub const DIM: usize = 16;

/// Generates a deterministic embedding from a seed.
///
/// Vectors with close seeds produce similar embeddings (correlated via sin).
pub fn make_embedding(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

/// Unit vector along one axis.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i] = 1.0;
    v
}

/// Unit vector with cosine similarity `cos` to `axis(0)`.
pub fn near_axis0(cos: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[0] = cos;
    v[1] = (1.0 - cos * cos).sqrt();
    v
}

/// Encodes a frame containing the given faces.
pub fn frame(faces: &[Vec<f32>]) -> Vec<u8> {
    serde_json::to_vec(faces).unwrap()
}

/// Frame with exactly one face.
pub fn portrait(embedding: &[f32]) -> Vec<u8> {
    frame(&[embedding.to_vec()])
}

/// Test capability that decodes frames produced by [`frame`].
#[derive(Debug)]
pub struct ScriptedCapability {
    dimension: usize,
    offline: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            offline: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes every call fail with `ModelUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulates inference latency.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `detect_and_embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingCapability for ScriptedCapability {
    fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(GateError::model_unavailable("scripted model offline"));
        }

        let faces: Vec<Vec<f32>> = serde_json::from_slice(image)
            .map_err(|e| InputError::InvalidImage(e.to_string()))?;
        Ok(faces
            .into_iter()
            .enumerate()
            .map(|(i, embedding)| {
                let x = i as f32 * 100.0;
                DetectedFace {
                    bounding_box: BoundingBox::new(x, 0.0, x + 80.0, 80.0),
                    confidence: 0.99,
                    embedding,
                }
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn status(&self) -> ModelStatus {
        ModelStatus {
            detector: "scripted-detector".into(),
            embedder: "scripted-embedder".into(),
            dimension: self.dimension,
            ready: !self.offline.load(Ordering::SeqCst),
        }
    }
}

/// Config with the test dimension.
pub fn config() -> Config {
    Config {
        embedding_dimension: EmbeddingDimension::Custom(DIM),
        ..Default::default()
    }
}

/// FaceGate over a fresh memory catalog.
pub fn memory_gate() -> (FaceGate, Arc<MemoryCatalog>, Arc<ScriptedCapability>) {
    memory_gate_with(config())
}

/// FaceGate over a fresh memory catalog with a custom config.
pub fn memory_gate_with(
    config: Config,
) -> (FaceGate, Arc<MemoryCatalog>, Arc<ScriptedCapability>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let capability = Arc::new(ScriptedCapability::new(DIM));
    let gate = FaceGate::with_catalog(catalog.clone(), config, capability.clone()).unwrap();
    (gate, catalog, capability)
}

/// FaceGate over a fresh redb catalog in a temp dir.
pub fn redb_gate() -> (FaceGate, Arc<ScriptedCapability>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let capability = Arc::new(ScriptedCapability::new(DIM));
    let gate = FaceGate::open(dir.path().join("gate.db"), config(), capability.clone()).unwrap();
    (gate, capability, dir)
}

/// Creates a tenant with one entry camera.
pub fn site(gate: &FaceGate, name: &str) -> (TenantId, CameraId) {
    let tenant = gate.create_tenant(name).unwrap();
    let camera = gate
        .register_camera(tenant, "main", CameraRole::Entry, None)
        .unwrap();
    (tenant, camera)
}
