//! Job records and their lifecycle.
//!
//! ```text
//! pending ──► running ──► completed
//!                    └──► failed(reason)
//! ```
//!
//! Every mutation of a stored job goes through [`JobStore`], which applies
//! transitions under its lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use cloudhaul_planner::{CompressOptions, FilterMode, Options, Progress, progress};
use cloudhaul_protocol::ErrorReason;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::JobDefaults;
use crate::error::OrchestratorError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: ErrorReason,
    pub message: String,
}

impl JobFailure {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<&OrchestratorError> for JobFailure {
    fn from(err: &OrchestratorError) -> Self {
        Self::new(err.reason(), err.to_string())
    }
}

/// A requested lifecycle edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    Complete,
    Fail(JobFailure),
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Start => JobStatus::Running,
            Self::Complete => JobStatus::Completed,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Parallel stream tuning handed to the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub parallelism: u32,
    pub swarm_streams: u32,
    /// Per-transfer buffer, e.g. `128M`.
    pub buffer_size: String,
    /// Multipart chunk size, e.g. `64M`.
    pub chunk_size: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            swarm_streams: 4,
            buffer_size: "128M".into(),
            chunk_size: "64M".into(),
        }
    }
}

/// Caller input for a new job. Unset fields take configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobRequest {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub filter_mode: Option<FilterMode>,
    pub transfers: Option<u32>,
    pub checkers: Option<u32>,
    pub buffer_size: Option<String>,
    pub parallelism: Option<u32>,
    pub swarm_streams: Option<u32>,
    pub chunk_size: Option<String>,
    /// Passed through to every conversion plan.
    pub conversion_options: Options,
    pub compression: CompressOptions,
}

impl JobRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Default::default()
        }
    }
}

/// Byte and file counters for a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounters {
    pub total_files: u64,
    pub transferred_files: u64,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl JobCounters {
    pub fn progress(&self) -> Progress {
        progress(
            self.total_files,
            self.transferred_files,
            self.total_bytes,
            self.transferred_bytes,
        )
    }
}

/// A bulk transfer job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub filter_mode: FilterMode,
    pub transfers: u32,
    pub checkers: u32,
    pub stream: StreamConfig,
    pub conversion_options: Options,
    pub compression: CompressOptions,
    pub created_at: DateTime<Utc>,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<JobFailure>,
    counters: JobCounters,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Job {
    /// Validates `request` and builds a `pending` job with a fresh id.
    pub fn create(
        request: JobRequest,
        defaults: &JobDefaults,
        now: DateTime<Utc>,
    ) -> Result<Self, OrchestratorError> {
        let source = present(request.source);
        let destination = present(request.destination);
        let (Some(source), Some(destination)) = (source.clone(), destination.clone()) else {
            let mut missing = Vec::new();
            if source.is_none() {
                missing.push("source");
            }
            if destination.is_none() {
                missing.push("destination");
            }
            return Err(OrchestratorError::MissingParameters(missing));
        };

        let stream = StreamConfig {
            parallelism: request.parallelism.unwrap_or(defaults.stream.parallelism),
            swarm_streams: request
                .swarm_streams
                .unwrap_or(defaults.stream.swarm_streams),
            buffer_size: request
                .buffer_size
                .unwrap_or_else(|| defaults.stream.buffer_size.clone()),
            chunk_size: request
                .chunk_size
                .unwrap_or_else(|| defaults.stream.chunk_size.clone()),
        };

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            destination,
            filter_mode: request.filter_mode.unwrap_or(defaults.filter_mode),
            transfers: request.transfers.unwrap_or(defaults.transfers),
            checkers: request.checkers.unwrap_or(defaults.checkers),
            stream,
            conversion_options: request.conversion_options,
            compression: request.compression,
            created_at: now,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            counters: JobCounters::default(),
        })
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn counters(&self) -> JobCounters {
        self.counters
    }

    /// Applies a lifecycle edge.
    ///
    /// Only `pending → running`, `running → completed` and
    /// `running → failed` are legal. Anything else is rejected and leaves
    /// the job untouched.
    pub fn transition(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        match (self.status, transition) {
            (JobStatus::Pending, Transition::Start) => {
                self.status = JobStatus::Running;
                self.started_at = Some(now);
            }
            (JobStatus::Running, Transition::Complete) => {
                self.status = JobStatus::Completed;
                self.completed_at = Some(now);
            }
            (JobStatus::Running, Transition::Fail(failure)) => {
                self.status = JobStatus::Failed;
                self.completed_at = Some(now);
                self.error = Some(failure);
            }
            (from, transition) => {
                return Err(OrchestratorError::InvalidTransition {
                    from,
                    to: transition.target(),
                });
            }
        }
        Ok(())
    }
}

/// Process-resident owner of every job record.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        info!(job = %job.id, source = %job.source, destination = %job.destination, "job created");
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone(), job);
    }

    /// A snapshot of one job.
    pub fn get(&self, id: &str) -> Result<Job, OrchestratorError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Applies `transition` to the stored job and returns the new snapshot.
    pub fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Job, OrchestratorError> {
        self.update(id, |job| {
            let from = job.status;
            job.transition(transition, now)?;
            debug!(job = %job.id, %from, to = %job.status, "job transition");
            Ok(())
        })
    }

    /// Records the size of the planned work.
    pub fn set_totals(&self, id: &str, files: u64, bytes: u64) -> Result<Job, OrchestratorError> {
        self.update(id, |job| {
            job.counters.total_files = files;
            job.counters.total_bytes = bytes;
            Ok(())
        })
    }

    /// Adds a finished batch to the transferred counters.
    pub fn record_batch(&self, id: &str, files: u64, bytes: u64) -> Result<Job, OrchestratorError> {
        self.update(id, |job| {
            job.counters.transferred_files += files;
            job.counters.transferred_bytes += bytes;
            Ok(())
        })
    }

    fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut Job) -> Result<(), OrchestratorError>,
    ) -> Result<Job, OrchestratorError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))?;
        f(job)?;
        Ok(job.clone())
    }
}
