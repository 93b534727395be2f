//! Orchestration core for bulk cloud-to-cloud transfers.
//!
//! The [`Orchestrator`] owns job records and drives each job through the
//! planning pipeline in `cloudhaul-planner`, billing work against accounts
//! in `cloudhaul-quota` and dispatching batches to an external transfer
//! engine. Progress and outcomes are fanned out through the [`EventBus`].
//!
//! External systems plug in through traits:
//! - [`TransferEngine`]: request/response access to the copy engine
//! - [`FileEnumerator`]: lists the files under a source
//! - [`MetricsStore`]: read access to recorded job metrics

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod retry;

// Re-export primary types for convenience.
pub use config::{ConfigError, OrchestratorConfig};
pub use engine::{EngineClient, FileEnumerator, TransferEngine};
pub use error::OrchestratorError;
pub use events::EventBus;
pub use job::{Job, JobFailure, JobRequest, JobStatus, StreamConfig, Transition};
pub use metrics::{MetricsStore, Recommendation};
pub use orchestrator::{Collaborators, JobSummary, Orchestrator};
pub use retry::{RetryPolicy, backoff_delay, should_retry};
