//! Access log records and live feed.
//!
//! Every face processed by an identification produces one immutable
//! [`AccessLogEntry`], matched or not. Entries are persisted in the
//! catalog and published to in-process subscribers through an
//! [`AccessLogFeed`].

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{AccessLogId, BoundingBox, CameraId, IdentityId, TenantId, Timestamp};

/// Immutable record of one identification attempt at a camera.
///
/// References to the identity and camera are not enforced: deleting
/// either keeps the history intact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Unique identifier (UUID v7).
    pub id: AccessLogId,

    /// Tenant the camera belongs to.
    pub tenant_id: TenantId,

    /// Camera that captured the frame.
    pub camera_id: CameraId,

    /// Matched identity, `None` when unmatched.
    pub identity_id: Option<IdentityId>,

    /// Similarity of the nearest reference vector (0.0 if the tenant has
    /// none).
    pub similarity: f32,

    /// Wall-clock pipeline latency in milliseconds.
    pub processing_time_ms: f64,

    /// Face location in the frame.
    pub bounding_box: BoundingBox,

    /// When the identification happened.
    pub timestamp: Timestamp,
}

impl AccessLogEntry {
    /// Returns true if the face was matched to an identity.
    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Fan-out of access log entries to in-process subscribers.
///
/// Each subscriber gets a bounded channel. Publishing never blocks: a
/// subscriber whose channel is full misses the entry, and disconnected
/// subscribers are dropped on the next publish.
#[derive(Debug, Default)]
pub struct AccessLogFeed {
    subscribers: Mutex<Vec<Sender<AccessLogEntry>>>,
}

impl AccessLogFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber with room for `capacity` pending entries.
    pub fn subscribe(&self, capacity: usize) -> Receiver<AccessLogEntry> {
        let (tx, rx) = bounded(capacity.max(1));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(tx);
        debug!(subscribers = subscribers.len(), "Access log subscriber added");
        rx
    }

    /// Delivers an entry to every subscriber without blocking.
    pub fn publish(&self, entry: &AccessLogEntry) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if subscribers.is_empty() {
            return;
        }

        subscribers.retain(|tx| match tx.try_send(entry.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(entry = %entry.id, "Access log subscriber is full, dropping entry");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Access log subscriber disconnected");
                false
            }
        });
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}
