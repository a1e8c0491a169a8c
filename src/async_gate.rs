//! Async facade over [`FaceGate`].
//!
//! Every call runs on tokio's blocking pool. With a request timeout set,
//! a call that exceeds it returns `ResourceError::TimedOut` and cancels its
//! [`CancelToken`], so a pending index wait gives up. Work already handed
//! to the model runs to completion and releases its handle normally.
//!
//! An enrollment that times out after its write handle was granted still
//! commits: the reference vector is stored and indexed, but the caller only
//! sees `TimedOut`. The committed record id is logged at `warn!`, and the
//! record shows up in [`FaceGate::list_references`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use facegate::AsyncFaceGate;
//!
//! let gate = AsyncFaceGate::new(gate).with_timeout(Duration::from_secs(2));
//! let result = gate.identify(tenant, camera, frame_bytes).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::db::FaceGate;
use crate::error::{ResourceError, Result};
use crate::identify::Identification;
use crate::index::IndexStats;
use crate::registry::CancelToken;
use crate::types::{CameraId, IdentityId, ReferenceId, TenantId};

/// Cloneable async handle to a shared [`FaceGate`].
#[derive(Clone, Debug)]
pub struct AsyncFaceGate {
    inner: Arc<FaceGate>,
    timeout: Option<Duration>,
}

impl AsyncFaceGate {
    /// Wraps a FaceGate with no request timeout.
    pub fn new(gate: FaceGate) -> Self {
        Self::from_arc(Arc::new(gate))
    }

    /// Wraps an already shared FaceGate.
    pub fn from_arc(gate: Arc<FaceGate>) -> Self {
        Self {
            inner: gate,
            timeout: None,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The wrapped FaceGate, for synchronous calls.
    pub fn blocking(&self) -> &Arc<FaceGate> {
        &self.inner
    }

    /// See [`FaceGate::identify`].
    pub async fn identify(
        &self,
        tenant_id: TenantId,
        camera_id: CameraId,
        image: Vec<u8>,
    ) -> Result<Identification> {
        self.run(move |gate, cancel| {
            gate.identify_cancellable(tenant_id, camera_id, &image, cancel)
        })
        .await
    }

    /// See [`FaceGate::enroll_reference`].
    ///
    /// A `TimedOut` error does not prove nothing was stored: if the write
    /// handle was granted before the timeout, the enrollment commits in the
    /// background. List the identity's references to reconcile.
    pub async fn enroll_reference(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        image: Vec<u8>,
    ) -> Result<ReferenceId> {
        self.run(move |gate, cancel| {
            let enrolled =
                gate.enroll_reference_cancellable(tenant_id, identity_id, &image, cancel);
            warn_if_abandoned(&enrolled, identity_id, cancel);
            enrolled
        })
        .await
    }

    /// See [`FaceGate::enroll_vector`].
    ///
    /// Like [`enroll_reference`](Self::enroll_reference), may commit after
    /// returning `TimedOut`.
    pub async fn enroll_vector(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        vector: Vec<f32>,
    ) -> Result<ReferenceId> {
        self.run(move |gate, cancel| {
            let enrolled = gate.enroll_vector_cancellable(tenant_id, identity_id, &vector, cancel);
            warn_if_abandoned(&enrolled, identity_id, cancel);
            enrolled
        })
        .await
    }

    /// See [`FaceGate::remove_reference`].
    pub async fn remove_reference(&self, reference_id: ReferenceId) -> Result<()> {
        self.run(move |gate, _| gate.remove_reference(reference_id))
            .await
    }

    /// See [`FaceGate::rebuild_index`].
    pub async fn rebuild_index(&self, tenant_id: TenantId) -> Result<IndexStats> {
        self.run(move |gate, _| gate.rebuild_index(tenant_id)).await
    }

    /// Runs a blocking FaceGate call under the request timeout.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FaceGate, &CancelToken) -> Result<T> + Send + 'static,
    {
        let gate = Arc::clone(&self.inner);
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || f(&gate, &task_cancel));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    warn!(timeout_ms = limit.as_millis() as u64, "Request timed out");
                    return Err(ResourceError::TimedOut.into());
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(ResourceError::Cancelled.into()),
        }
    }
}

/// Logs an enrollment that committed after its caller gave up on it.
fn warn_if_abandoned(
    enrolled: &Result<ReferenceId>,
    identity_id: IdentityId,
    cancel: &CancelToken,
) {
    if let Ok(reference_id) = enrolled {
        if cancel.is_cancelled() {
            warn!(
                %reference_id,
                identity = %identity_id,
                "Enrollment committed after its request timed out"
            );
        }
    }
}
