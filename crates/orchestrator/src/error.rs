//! Orchestrator error types.

use cloudhaul_planner::PlannerError;
use cloudhaul_protocol::{EngineFailure, ErrorReason};
use cloudhaul_quota::QuotaError;

use crate::config::ConfigError;
use crate::job::JobStatus;

/// Errors produced while creating or driving jobs.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("missing parameters: {}", .0.join(", "))]
    MissingParameters(Vec<&'static str>),

    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("planning failed: {0}")]
    Planner(#[from] PlannerError),

    #[error("quota: {0}")]
    Quota(#[from] QuotaError),

    /// A transfer engine call failed. `account` is set when the call was
    /// made on behalf of a specific destination account.
    #[error("engine: {failure}")]
    Engine {
        failure: EngineFailure,
        account: Option<String>,
    },

    #[error("no metrics recorded for job {0}")]
    MetricsNotFound(String),

    #[error("metrics store: {0}")]
    Metrics(String),

    #[error("job aborted")]
    Aborted,

    #[error("batch task failed: {0}")]
    TaskFailed(String),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl From<EngineFailure> for OrchestratorError {
    fn from(failure: EngineFailure) -> Self {
        Self::Engine {
            failure,
            account: None,
        }
    }
}

impl OrchestratorError {
    /// Machine-readable reason for this error.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::MissingParameters(_) => ErrorReason::MissingParameters,
            Self::InvalidTransition { .. } => ErrorReason::InvalidTransition,
            Self::JobNotFound(_) => ErrorReason::JobNotFound,
            Self::Planner(e) => e.reason(),
            Self::Quota(e) => e.reason(),
            Self::Engine { failure, .. } => failure.reason.into(),
            Self::MetricsNotFound(_) => ErrorReason::NotFound,
            Self::Metrics(_) | Self::TaskFailed(_) => ErrorReason::EngineError,
            Self::Aborted => ErrorReason::Aborted,
            Self::Config(_) => ErrorReason::InvalidConfig,
        }
    }

    /// Account the failing engine call was made for, if any.
    pub fn account(&self) -> Option<&str> {
        match self {
            Self::Engine { account, .. } => account.as_deref(),
            _ => None,
        }
    }
}
