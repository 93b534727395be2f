//! Events pushed outward to the notification layer.

use serde::{Deserialize, Serialize};

/// Aggregate topic every job event is mirrored to.
pub const ALL_JOBS_TOPIC: &str = "jobs:all";

/// Returns the per-job topic, `job:<id>`.
pub fn job_topic(id: &str) -> String {
    format!("job:{id}")
}

/// Kind of a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushEventKind {
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "fileProgress")]
    FileProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "preflight")]
    Preflight,
}

/// An event delivered to subscribers of a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub topic: String,
    #[serde(rename = "event")]
    pub kind: PushEventKind,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_topic_format() {
        assert_eq!(job_topic("abc"), "job:abc");
    }

    #[test]
    fn event_wire_shape() {
        let ev = PushEvent {
            topic: job_topic("j1"),
            kind: PushEventKind::FileProgress,
            payload: serde_json::json!({"batch": 0}),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "fileProgress");
        assert_eq!(json["topic"], "job:j1");
    }
}
