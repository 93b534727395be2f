//! Topic fan-out toward the push layer.
//!
//! Every event for job `X` goes to `job:X` and is mirrored to `jobs:all`
//! with `jobId` merged into its payload. Publishing never blocks: a
//! subscriber whose queue is full misses that event.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use cloudhaul_protocol::{ALL_JOBS_TOPIC, PushEvent, PushEventKind, job_topic};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Default queue depth per subscriber.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// In-process publish/subscribe keyed by topic.
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<PushEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to a topic such as `job:<id>` or `jobs:all`.
    pub fn subscribe(&self, topic: impl Into<String>) -> mpsc::Receiver<PushEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Publishes an event for `key` (a job id or preflight check id).
    pub fn publish(&self, key: &str, kind: PushEventKind, payload: Value) {
        let mirrored = match payload.clone() {
            Value::Object(mut map) => {
                map.insert("jobId".into(), Value::String(key.to_string()));
                Value::Object(map)
            }
            other => serde_json::json!({ "jobId": key, "data": other }),
        };
        self.deliver(job_topic(key), kind, payload);
        self.deliver(ALL_JOBS_TOPIC.to_string(), kind, mirrored);
    }

    fn deliver(&self, topic: String, kind: PushEventKind, payload: Value) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(&topic) else {
            return;
        };

        senders.retain(|tx| {
            let event = PushEvent {
                topic: topic.clone(),
                kind,
                payload: payload.clone(),
            };
            match tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(%topic, ?kind, "subscriber queue full, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(%topic, "pruning closed subscriber");
                    false
                }
            }
        });
        if senders.is_empty() {
            subscribers.remove(&topic);
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, |s| s.iter().filter(|tx| !tx.is_closed()).count())
    }
}
