//! Inbound change notifications.
//!
//! Writers publish one event per changed node; the consumer drains them in
//! batches and applies each batch under a single store write lock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::{ChangeType, ContentKind};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "snapcache_event_queue_len";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// One node-level change as delivered by the invalidation broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentChange {
    pub id: i32,
    pub key: Uuid,
    pub change_type: ChangeType,
}

impl ContentChange {
    pub fn new(id: i32, key: Uuid, change_type: ChangeType) -> Self {
        Self {
            id,
            key,
            change_type,
        }
    }

    pub fn refresh_all() -> Self {
        Self::new(0, Uuid::nil(), ChangeType::RefreshAll)
    }

    pub fn refresh_node(id: i32, key: Uuid) -> Self {
        Self::new(id, key, ChangeType::RefreshNode)
    }

    pub fn refresh_branch(id: i32, key: Uuid) -> Self {
        Self::new(id, key, ChangeType::RefreshBranch)
    }

    pub fn remove(id: i32, key: Uuid) -> Self {
        Self::new(id, key, ChangeType::Remove)
    }
}

/// A queued change with idempotency and ordering metadata.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: ContentKind,
    pub change: ContentChange,
    pub timestamp: OffsetDateTime,
}

impl ChangeEvent {
    pub fn new(kind: ContentKind, change: ContentChange, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            change,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO of change events.
///
/// Contention is expected to be low, so a plain mutex guards the queue.
pub struct EventQueue {
    queue: Mutex<VecDeque<ChangeEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: ContentKind, change: ContentChange) {
        let epoch = self.next_epoch();
        let event = ChangeEvent::new(kind, change, epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            kind = kind.as_str(),
            node_id = change.id,
            change = change.change_type.as_str(),
            "Change event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    pub fn publish_all<I>(&self, kind: ContentKind, changes: I)
    where
        I: IntoIterator<Item = ContentChange>,
    {
        for change in changes {
            self.publish(kind, change);
        }
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<ChangeEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
