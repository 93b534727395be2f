//! Seam to the external metrics store.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Error reported by a [`MetricsStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MetricsError(pub String);

pub type MetricsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MetricsError>> + Send + 'a>>;

/// A tuning suggestion derived from recorded job metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Setting the suggestion applies to, e.g. `transfers`.
    pub parameter: String,
    pub suggested: serde_json::Value,
    #[serde(default)]
    pub rationale: String,
}

/// Read access to stored per-job metrics.
///
/// Snapshots are opaque to the orchestrator and passed through as JSON.
pub trait MetricsStore: Send + Sync {
    /// Latest snapshot for a job, `None` when nothing was recorded.
    fn get_metrics(&self, job_id: String) -> MetricsFuture<'_, Option<serde_json::Value>>;

    fn get_recommendations(&self, job_id: String) -> MetricsFuture<'_, Vec<Recommendation>>;
}
