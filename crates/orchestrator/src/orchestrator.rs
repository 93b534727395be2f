//! Drives jobs from creation to a terminal state.
//!
//! For each job: enumerate the source, tag and assign files to lanes, plan
//! and batch each lane, then dispatch batches to the transfer engine with a
//! bounded number in flight. Each batch claims quota on one account, starts
//! a remote copy and polls it to completion. Transient failures are retried
//! with backoff; a rate-limited account is rotated out before the retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use cloudhaul_planner::{Lane, ListedFile, Progress, assign, tag_files};
use cloudhaul_protocol::{
    EngineFailure, ErrorReason, FailureReason, PushEventKind, Remote, RemoteJobState,
};
use cloudhaul_quota::{Account, QuotaTracker};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::engine::{CopyConfig, CopyRequest, EngineClient, FileEnumerator, TransferEngine};
use crate::error::OrchestratorError;
use crate::events::EventBus;
use crate::job::{Job, JobCounters, JobFailure, JobRequest, JobStore, Transition};
use crate::metrics::{MetricsStore, Recommendation};
use crate::plan::{BatchWork, plan_work};

/// External collaborators the orchestrator drives.
pub struct Collaborators {
    pub engine: Arc<dyn TransferEngine>,
    pub enumerator: Arc<dyn FileEnumerator>,
    pub metrics: Option<Arc<dyn MetricsStore>>,
    pub events: Arc<EventBus>,
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub files: u64,
    pub bytes: u64,
    /// Bytes the engine reported writing at the destination.
    pub transferred_bytes: u64,
    pub batches: usize,
    pub ignored: usize,
}

/// Aggregate progress pushed on `progress` events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressUpdate {
    #[serde(flatten)]
    percent: Progress,
    #[serde(flatten)]
    counters: JobCounters,
}

/// Per-batch status pushed on `fileProgress` events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchProgress<'a> {
    lane: Lane,
    batch: usize,
    attempt: u32,
    account: &'a str,
    remote_job_id: u64,
    files: usize,
    transferred: u64,
    speed: f64,
    percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    eta: Option<u64>,
}

struct BatchReport {
    transferred: u64,
}

/// Owns every job and coordinates their execution.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    jobs: JobStore,
    quota: QuotaTracker,
    engine: EngineClient,
    enumerator: Arc<dyn FileEnumerator>,
    metrics: Option<Arc<dyn MetricsStore>>,
    events: Arc<EventBus>,
    /// Cancellation handles of running jobs.
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    /// Validates `config` and registers its accounts.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let quota = QuotaTracker::new(config.quota.cycle()?);
        let now = Utc::now();
        for account in &config.quota.accounts {
            quota.register(account.id.clone(), account.quota_limit, now)?;
        }
        if quota.is_empty() {
            warn!("no accounts configured, batches will fail with quota_exhausted");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                engine: EngineClient::new(collaborators.engine, config.engine.call_timeout()),
                enumerator: collaborators.enumerator,
                metrics: collaborators.metrics,
                events: collaborators.events,
                jobs: JobStore::new(),
                quota,
                running: Mutex::new(HashMap::new()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.inner.quota
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Creates a `pending` job.
    pub fn create_job(&self, request: JobRequest) -> Result<Job, OrchestratorError> {
        let job = Job::create(request, &self.inner.config.job_defaults, Utc::now())?;
        self.inner.jobs.insert(job.clone());
        Ok(job)
    }

    pub fn job(&self, id: &str) -> Result<Job, OrchestratorError> {
        self.inner.jobs.get(id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.jobs.list()
    }

    /// Moves the job to `running` and drives it on a spawned task.
    pub fn start_job(
        &self,
        id: &str,
    ) -> Result<JoinHandle<Result<JobSummary, OrchestratorError>>, OrchestratorError> {
        let cancel = self.inner.begin(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Ok(tokio::spawn(async move { inner.drive(&id, cancel).await }))
    }

    /// Moves the job to `running` and drives it to completion.
    pub async fn run_job(&self, id: &str) -> Result<JobSummary, OrchestratorError> {
        let cancel = self.inner.begin(id)?;
        self.inner.drive(id, cancel).await
    }

    /// Stops dispatch for a running job. In-flight remote copies are
    /// stopped and the job ends `failed(aborted)`.
    pub fn abort_job(&self, id: &str) -> Result<(), OrchestratorError> {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let job = self.inner.jobs.get(id)?;
        match running.get(id) {
            Some(token) => {
                info!(job = %id, "aborting job");
                token.cancel();
                Ok(())
            }
            None => Err(OrchestratorError::InvalidTransition {
                from: job.status(),
                to: crate::job::JobStatus::Failed,
            }),
        }
    }

    pub async fn metrics(&self, id: &str) -> Result<serde_json::Value, OrchestratorError> {
        self.inner
            .metrics_store()?
            .get_metrics(id.to_string())
            .await
            .map_err(|e| OrchestratorError::Metrics(e.0))?
            .ok_or_else(|| OrchestratorError::MetricsNotFound(id.to_string()))
    }

    pub async fn recommendations(
        &self,
        id: &str,
    ) -> Result<Vec<Recommendation>, OrchestratorError> {
        self.inner
            .metrics_store()?
            .get_recommendations(id.to_string())
            .await
            .map_err(|e| OrchestratorError::Metrics(e.0))
    }

    pub async fn set_bandwidth_limit(&self, rate: &str) -> Result<(), OrchestratorError> {
        info!(rate, "setting bandwidth limit");
        Ok(self.inner.engine.set_bandwidth_limit(rate).await?)
    }

    pub async fn list_remotes(&self) -> Result<Vec<Remote>, OrchestratorError> {
        Ok(self.inner.engine.list_remotes().await?)
    }

    /// Relays a preflight check update to `job:<check_id>` and `jobs:all`.
    pub fn publish_preflight(&self, check_id: &str, update: serde_json::Value) {
        self.inner
            .events
            .publish(check_id, PushEventKind::Preflight, update);
    }
}

impl Inner {
    fn metrics_store(&self) -> Result<&Arc<dyn MetricsStore>, OrchestratorError> {
        self.metrics
            .as_ref()
            .ok_or_else(|| OrchestratorError::Metrics("no metrics store configured".into()))
    }

    /// A job holds a cancellation token exactly while it is `running`; the
    /// `running` lock is held across each status change to keep it so.
    fn begin(&self, id: &str) -> Result<CancellationToken, OrchestratorError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        self.jobs.transition(id, Transition::Start, Utc::now())?;
        let token = CancellationToken::new();
        running.insert(id.to_string(), token.clone());
        info!(job = %id, "job started");
        Ok(token)
    }

    async fn drive(
        self: &Arc<Self>,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<JobSummary, OrchestratorError> {
        let result = match self.jobs.get(id) {
            Ok(job) => self.execute(job, &cancel).await,
            Err(e) => Err(e),
        };

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = self.finish(id, result);
        running.remove(id);
        outcome
    }

    /// Applies the terminal transition and publishes the outcome.
    fn finish(
        &self,
        id: &str,
        result: Result<JobSummary, OrchestratorError>,
    ) -> Result<JobSummary, OrchestratorError> {
        match result {
            Ok(summary) => {
                self.jobs.transition(id, Transition::Complete, Utc::now())?;
                info!(
                    job = %id,
                    files = summary.files,
                    bytes = summary.bytes,
                    batches = summary.batches,
                    "job completed"
                );
                self.events
                    .publish(id, PushEventKind::Complete, to_payload(&summary));
                Ok(summary)
            }
            Err(err) => {
                let failure = JobFailure::from(&err);
                self.jobs
                    .transition(id, Transition::Fail(failure.clone()), Utc::now())?;
                error!(job = %id, reason = %failure.reason, error = %failure.message, "job failed");
                self.events
                    .publish(id, PushEventKind::Error, to_payload(&failure));
                Err(err)
            }
        }
    }

    async fn execute(
        self: &Arc<Self>,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<JobSummary, OrchestratorError> {
        let listing = self.enumerate(&job, cancel).await?;
        let files = tag_files(listing, job.filter_mode, &self.config.tagging)?;
        let lanes = assign(files);
        let work = plan_work(
            &lanes,
            &self.config.batching,
            &job.conversion_options,
            &job.compression,
        )?;

        let snapshot = self
            .jobs
            .set_totals(&job.id, lanes.len() as u64, lanes.total_bytes())?;
        info!(
            job = %job.id,
            files = lanes.len(),
            bytes = lanes.total_bytes(),
            ignored = lanes.ignored(),
            batches = work.len(),
            "job planned"
        );
        self.publish_progress(&snapshot);

        let batch_count = work.len();
        let transferred_bytes = self.dispatch(Arc::new(job), work, cancel).await?;

        Ok(JobSummary {
            files: lanes.len() as u64,
            bytes: lanes.total_bytes(),
            transferred_bytes,
            batches: batch_count,
            ignored: lanes.ignored(),
        })
    }

    /// Lists the source, retrying transient failures.
    async fn enumerate(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListedFile>, OrchestratorError> {
        let timeout = self.engine.call_timeout();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let listed = tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Aborted),
                r = tokio::time::timeout(timeout, self.enumerator.list_files(job.source.clone())) => r,
            };
            let err = match listed {
                Ok(Ok(listing)) => {
                    debug!(job = %job.id, files = listing.len(), "source enumerated");
                    return Ok(listing);
                }
                Ok(Err(failure)) => OrchestratorError::from(failure),
                Err(_) => OrchestratorError::from(EngineFailure::new(
                    FailureReason::ConnectionTimeout,
                    format!("listing {} timed out after {timeout:?}", job.source),
                )),
            };
            self.backoff(err, attempt, cancel).await?;
        }
    }

    /// Sleeps before the next attempt, or returns `err` when it is final.
    async fn backoff(
        &self,
        err: OrchestratorError,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        if !self.config.retry.should_retry(err.reason(), attempt) {
            return Err(err);
        }
        let delay = self.config.retry.delay_for_attempt(attempt);
        warn!(
            attempt,
            reason = %err.reason(),
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "attempt failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Aborted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Runs batches with at most `max_in_flight_batches` at once.
    ///
    /// The first batch that fails for good stops further dispatch and
    /// interrupts its siblings.
    async fn dispatch(
        self: &Arc<Self>,
        job: Arc<Job>,
        work: Vec<BatchWork>,
        cancel: &CancellationToken,
    ) -> Result<u64, OrchestratorError> {
        let semaphore = Arc::new(Semaphore::new(self.config.batching.max_in_flight_batches));
        let batch_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();

        for item in work {
            let permit = tokio::select! {
                _ = batch_cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let inner = Arc::clone(self);
            let job = Arc::clone(&job);
            let batch_cancel = batch_cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = inner.run_batch(&job, &item, &batch_cancel).await;
                if result.is_err() {
                    batch_cancel.cancel();
                }
                result
            });
        }

        let mut transferred = 0;
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => transferred += report.transferred,
                Ok(Err(OrchestratorError::Aborted)) => {}
                Ok(Err(err)) => {
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    failure.get_or_insert(OrchestratorError::TaskFailed(join_err.to_string()));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Aborted);
        }
        match failure {
            Some(err) => Err(err),
            None if batch_cancel.is_cancelled() => Err(OrchestratorError::Aborted),
            None => Ok(transferred),
        }
    }

    /// Runs one batch, retrying transient failures.
    ///
    /// The batch estimate is claimed once and the account is kept across
    /// retries. Only a rate-limited account is swapped for a fresh claim;
    /// bytes already attributed to it stay attributed.
    async fn run_batch(
        &self,
        job: &Job,
        work: &BatchWork,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, OrchestratorError> {
        let mut claimed: Option<Account> = None;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Aborted);
            }
            let account = match claimed.take() {
                Some(account) => account,
                None => self.quota.claim(work.estimated_bytes, Utc::now())?,
            };

            let err = match self.attempt_batch(job, work, &account, attempt, cancel).await {
                Ok(report) => return Ok(report),
                Err(OrchestratorError::Aborted) => return Err(OrchestratorError::Aborted),
                Err(err) => err,
            };

            if err.reason() == ErrorReason::RateLimited {
                if let Err(e) = self.quota.mark_exhausted(&account.id, Utc::now()) {
                    warn!(account = %account.id, error = %e, "failed to rotate out rate-limited account");
                }
            } else {
                claimed = Some(account);
            }
            debug!(
                job = %job.id,
                lane = %work.batch.lane,
                batch = work.batch.index,
                attempt,
                "batch attempt failed"
            );
            self.backoff(err, attempt, cancel).await?;
        }
    }

    async fn attempt_batch(
        &self,
        job: &Job,
        work: &BatchWork,
        account: &Account,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, OrchestratorError> {
        let on_account = |failure: EngineFailure| OrchestratorError::Engine {
            failure,
            account: Some(account.id.clone()),
        };

        let request = CopyRequest {
            src_fs: job.source.clone(),
            dst_fs: job.destination.clone(),
            config: CopyConfig {
                account: account.id.clone(),
                lane: work.batch.lane,
                batch: work.batch.index,
                files: work
                    .batch
                    .files
                    .iter()
                    .map(|f| f.path().to_string())
                    .collect(),
                transfers: job.transfers,
                checkers: job.checkers,
                stream: job.stream.clone(),
                tooling: work.tooling,
                conversions: work.conversions.clone(),
                compressions: work.compressions.clone(),
            },
        };
        let remote_id = self
            .engine
            .start_async_copy(&request)
            .await
            .map_err(on_account)?;
        debug!(
            job = %job.id,
            lane = %work.batch.lane,
            batch = work.batch.index,
            account = %account.id,
            remote_id,
            "batch dispatched"
        );

        let poll_interval = self.config.engine.poll_interval();
        let deadline = self
            .config
            .engine
            .copy_timeout()
            .map(|limit| tokio::time::Instant::now() + limit);
        let mut wait = poll_interval;
        let mut poll_failures = 0;

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_remote(remote_id).await;
                    return Err(OrchestratorError::Aborted);
                }
                _ = tokio::time::sleep(wait) => {}
            }

            // A failed poll says nothing about the copy itself, so the same
            // copy is polled again. It is stopped before the batch gives up.
            let status = match self.engine.get_job_status(remote_id).await {
                Ok(status) => {
                    poll_failures = 0;
                    wait = poll_interval;
                    status
                }
                Err(failure) => {
                    poll_failures += 1;
                    let err = on_account(failure);
                    if self.config.retry.should_retry(err.reason(), poll_failures) {
                        wait = self.config.retry.delay_for_attempt(poll_failures);
                        warn!(
                            remote_id,
                            attempt = poll_failures,
                            error = %err,
                            "status poll failed, polling again"
                        );
                        continue;
                    }
                    self.stop_remote(remote_id).await;
                    return Err(err);
                }
            };
            self.events.publish(
                &job.id,
                PushEventKind::FileProgress,
                to_payload(&BatchProgress {
                    lane: work.batch.lane,
                    batch: work.batch.index,
                    attempt,
                    account: &account.id,
                    remote_job_id: remote_id,
                    files: work.batch.files.len(),
                    transferred: status.transferred,
                    speed: status.speed,
                    percentage: status.percentage,
                    eta: status.eta,
                }),
            );

            match status.status {
                RemoteJobState::Finished => break status,
                RemoteJobState::Failed => {
                    let failure = status.failure.unwrap_or_else(|| {
                        EngineFailure::new(FailureReason::Other, "remote copy failed")
                    });
                    return Err(on_account(failure));
                }
                RemoteJobState::Queued | RemoteJobState::Running => {}
            }

            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                self.stop_remote(remote_id).await;
                return Err(on_account(EngineFailure::new(
                    FailureReason::ConnectionTimeout,
                    format!("remote copy {remote_id} exceeded its time limit"),
                )));
            }
        };

        // Estimates can undershoot; usage must reflect what was written.
        if status.transferred > work.estimated_bytes {
            self.quota.attribute(
                &account.id,
                status.transferred - work.estimated_bytes,
                Utc::now(),
            )?;
        }

        let snapshot = self.jobs.record_batch(
            &job.id,
            work.batch.files.len() as u64,
            work.batch.total_bytes,
        )?;
        self.publish_progress(&snapshot);

        Ok(BatchReport {
            transferred: status.transferred,
        })
    }

    async fn stop_remote(&self, remote_id: u64) {
        match self.engine.stop_job(remote_id).await {
            Ok(()) => debug!(remote_id, "remote copy stopped"),
            Err(e) => warn!(remote_id, error = %e, "failed to stop remote copy"),
        }
    }

    fn publish_progress(&self, job: &Job) {
        let counters = job.counters();
        let update = ProgressUpdate {
            percent: counters.progress(),
            counters,
        };
        self.events
            .publish(&job.id, PushEventKind::Progress, to_payload(&update));
    }
}

fn to_payload<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize event payload");
        serde_json::Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::engine::EngineFuture;
    use crate::job::JobStatus;
    use crate::metrics::{MetricsError, MetricsFuture};
    use cloudhaul_protocol::{
        ALL_JOBS_TOPIC, EngineOp, EngineRequest, PushEvent, job_topic,
    };
    use cloudhaul_quota::AccountStatus;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct EngineState {
        /// Failures returned by the next `startAsyncCopy` calls, in order.
        start_failures: Vec<EngineFailure>,
        /// Failures returned by the next `getJobStatus` calls, in order.
        status_failures: Vec<EngineFailure>,
        /// Reported by every copy in place of finishing.
        remote_failure: Option<EngineFailure>,
        /// Bytes a copy reports once finished.
        finished_transferred: u64,
        /// Running replies before a copy reports finished.
        polls_until_done: u32,
        never_finish: bool,
        start_calls: u32,
        started: Vec<Value>,
        polls: HashMap<u64, u32>,
        stopped: Vec<u64>,
        bandwidth: Option<String>,
        /// Every operation received, in order.
        ops: Vec<EngineOp>,
    }

    #[derive(Default)]
    struct MockEngine {
        state: Mutex<EngineState>,
    }

    impl MockEngine {
        fn with(f: impl FnOnce(&mut EngineState)) -> Arc<Self> {
            let engine = Self::default();
            f(&mut engine.state.lock().unwrap());
            Arc::new(engine)
        }

        fn started_field(&self, field: &str) -> Vec<Value> {
            self.state
                .lock()
                .unwrap()
                .started
                .iter()
                .map(|c| c[field].clone())
                .collect()
        }
    }

    impl TransferEngine for MockEngine {
        fn call(&self, request: EngineRequest) -> EngineFuture<'_, Value> {
            Box::pin(async move {
                let mut s = self.state.lock().unwrap();
                s.ops.push(request.op);
                match request.op {
                    EngineOp::StartAsyncCopy => {
                        s.start_calls += 1;
                        if !s.start_failures.is_empty() {
                            return Err(s.start_failures.remove(0));
                        }
                        s.started.push(request.param("config").cloned().unwrap());
                        Ok(json!({ "jobId": s.started.len() as u64 }))
                    }
                    EngineOp::GetJobStatus => {
                        let id = request.param("jobId").and_then(Value::as_u64).unwrap();
                        if !s.status_failures.is_empty() {
                            return Err(s.status_failures.remove(0));
                        }
                        if let Some(failure) = &s.remote_failure {
                            return Ok(json!({ "status": "failed", "failure": failure }));
                        }
                        let limit = s.polls_until_done;
                        let never = s.never_finish;
                        let polls = s.polls.entry(id).or_insert(0);
                        *polls += 1;
                        if never || *polls <= limit {
                            Ok(json!({ "status": "running", "transferred": 10, "percentage": 10.0 }))
                        } else {
                            Ok(json!({
                                "status": "finished",
                                "transferred": s.finished_transferred,
                                "percentage": 100.0
                            }))
                        }
                    }
                    EngineOp::StopJob => {
                        let id = request.param("jobId").and_then(Value::as_u64).unwrap();
                        s.stopped.push(id);
                        Ok(json!({}))
                    }
                    EngineOp::SetBandwidthLimit => {
                        s.bandwidth = request
                            .param("rate")
                            .and_then(Value::as_str)
                            .map(String::from);
                        Ok(json!({}))
                    }
                    EngineOp::ListRemotes => Ok(json!({ "remotes": [{ "name": "gdrive" }] })),
                }
            })
        }
    }

    #[derive(Default)]
    struct MockEnumerator {
        listing: Vec<ListedFile>,
        /// Failures returned by the next calls, in order.
        failures: Mutex<Vec<EngineFailure>>,
        hang: bool,
        calls: Mutex<u32>,
    }

    impl MockEnumerator {
        fn listing(listing: Vec<ListedFile>) -> Self {
            Self {
                listing,
                ..Default::default()
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl FileEnumerator for MockEnumerator {
        fn list_files(&self, _source: String) -> EngineFuture<'_, Vec<ListedFile>> {
            Box::pin(async move {
                *self.calls.lock().unwrap() += 1;
                if self.hang {
                    return std::future::pending().await;
                }
                let mut failures = self.failures.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
                Ok(self.listing.clone())
            })
        }
    }

    struct MockMetrics;

    impl MetricsStore for MockMetrics {
        fn get_metrics(&self, job_id: String) -> MetricsFuture<'_, Option<Value>> {
            Box::pin(async move {
                Ok((job_id == "known").then(|| json!({ "avgSpeed": 1024 })))
            })
        }

        fn get_recommendations(&self, _job_id: String) -> MetricsFuture<'_, Vec<Recommendation>> {
            Box::pin(async move { Err(MetricsError("store offline".into())) })
        }
    }

    fn listing() -> Vec<ListedFile> {
        vec![
            ListedFile::new("docs/a.bin", 1000),
            ListedFile::new("audio/b.wav", 2000),
            ListedFile::new("logs/c.log", 1000),
            ListedFile::new("photos/.DS_Store", 10),
        ]
    }

    fn config_with(accounts: &[(&str, u64)]) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.quota.accounts = accounts
            .iter()
            .map(|&(id, quota_limit)| AccountConfig {
                id: id.into(),
                quota_limit,
            })
            .collect();
        config
    }

    fn orchestrator_with(
        config: OrchestratorConfig,
        engine: Arc<MockEngine>,
        enumerator: Arc<MockEnumerator>,
    ) -> Orchestrator {
        Orchestrator::new(
            config,
            Collaborators {
                engine,
                enumerator,
                metrics: Some(Arc::new(MockMetrics)),
                events: Arc::new(EventBus::new(1024)),
            },
        )
        .unwrap()
    }

    fn orchestrator(
        engine: Arc<MockEngine>,
        listing: Vec<ListedFile>,
        accounts: &[(&str, u64)],
    ) -> Orchestrator {
        orchestrator_with(
            config_with(accounts),
            engine,
            Arc::new(MockEnumerator::listing(listing)),
        )
    }

    fn quota_used(orch: &Orchestrator) -> u64 {
        orch.quota()
            .snapshot(Utc::now())
            .iter()
            .map(|a| a.quota_used)
            .sum()
    }

    fn timeouts(n: usize) -> Vec<EngineFailure> {
        (0..n)
            .map(|_| EngineFailure::new(FailureReason::ConnectionTimeout, "slow"))
            .collect()
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<PushEvent>) -> Vec<PushEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn runs_job_to_completion() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.polls_until_done = 2);
        let orch = orchestrator(engine.clone(), listing(), &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("gdrive:", "s3:bucket")).unwrap();
        let mut job_rx = orch.events().subscribe(job_topic(&job.id));
        let mut all_rx = orch.events().subscribe(ALL_JOBS_TOPIC);

        let summary = orch.run_job(&job.id).await.unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes, 4000);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.ignored, 1);

        let job = orch.job(&job.id).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.started_at().is_some());
        assert!(job.completed_at().is_some());
        assert_eq!(job.counters().progress().file_percent, 100.0);

        assert_eq!(
            engine.started_field("lane"),
            [json!("express"), json!("convert"), json!("compress")]
        );
        {
            let state = engine.state.lock().unwrap();
            let convert = &state.started[1];
            assert_eq!(convert["tooling"], "ffmpeg");
            assert_eq!(convert["conversions"][0]["output_format"], "flac");
        }

        // 1000 express + 1100 flac + 300 zstd.
        assert_eq!(orch.quota().snapshot(Utc::now())[0].quota_used, 2400);

        let events = drain(&mut job_rx);
        assert!(events.iter().any(|e| e.kind == PushEventKind::FileProgress));
        let last = events.last().unwrap();
        assert_eq!(last.kind, PushEventKind::Complete);
        assert_eq!(last.payload["files"], 3);

        let mirrored = drain(&mut all_rx);
        assert!(
            mirrored
                .iter()
                .all(|e| e.payload["jobId"] == json!(job.id))
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| {
            s.start_failures = vec![EngineFailure::new(FailureReason::ConnectionTimeout, "slow")];
        });
        let orch = orchestrator(engine.clone(), listing(), &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.run_job(&job.id).await.unwrap();
        let s = engine.state.lock().unwrap();
        assert_eq!(s.start_calls, 4);
        assert_eq!(s.started.len(), 3);
    }

    #[tokio::test]
    async fn rate_limited_account_is_rotated_out() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| {
            s.start_failures = vec![EngineFailure::new(FailureReason::RateLimited, "429")];
        });
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10_000), ("sa-1", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.run_job(&job.id).await.unwrap();
        assert_eq!(engine.started_field("account"), [json!("sa-1")]);
        let accounts = orch.quota().snapshot(Utc::now());
        assert_eq!(accounts[0].status, AccountStatus::Exhausted);
        assert_eq!(accounts[1].status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| {
            s.start_failures = vec![EngineFailure::new(FailureReason::NotFound, "no bucket")];
        });
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();
        let mut rx = orch.events().subscribe(job_topic(&job.id));

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::NotFound);
        assert_eq!(engine.state.lock().unwrap().start_calls, 1);

        let job = orch.job(&job.id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().unwrap().reason, ErrorReason::NotFound);

        let last = drain(&mut rx).pop().unwrap();
        assert_eq!(last.kind, PushEventKind::Error);
        assert_eq!(last.payload["reason"], "not_found");
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_ceiling() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| {
            s.start_failures = timeouts(10);
        });
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 1_000_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::ConnectionTimeout);
        assert_eq!(engine.state.lock().unwrap().start_calls, 5);
    }

    #[tokio::test]
    async fn no_headroom_fails_with_quota_exhausted() {
        tokio::time::pause();
        let engine = MockEngine::with(|_| {});
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();
        let mut all_rx = orch.events().subscribe(ALL_JOBS_TOPIC);

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::QuotaExhausted);
        assert_eq!(engine.state.lock().unwrap().start_calls, 0);

        let error = drain(&mut all_rx)
            .into_iter()
            .find(|e| e.kind == PushEventKind::Error)
            .unwrap();
        assert_eq!(error.payload["jobId"], json!(job.id));
        assert_eq!(error.payload["reason"], "quota_exhausted");
    }

    #[tokio::test]
    async fn abort_stops_remote_copies() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.never_finish = true);
        let orch = orchestrator(engine.clone(), listing(), &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();
        let mut rx = orch.events().subscribe(job_topic(&job.id));

        let handle = orch.start_job(&job.id).unwrap();
        loop {
            let ev = rx.recv().await.unwrap();
            if ev.kind == PushEventKind::FileProgress {
                break;
            }
        }
        orch.abort_job(&job.id).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.reason(), ErrorReason::Aborted);

        let job = orch.job(&job.id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().unwrap().reason, ErrorReason::Aborted);

        let s = engine.state.lock().unwrap();
        assert!(!s.stopped.is_empty());
        // Only the first two batches ever got a slot.
        assert_eq!(s.started.len(), 2);
    }

    #[tokio::test]
    async fn retries_reuse_the_claimed_quota() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.start_failures = timeouts(4));
        let files = vec![ListedFile::new("a.bin", 1000)];
        // Room for two claims of the estimate, not five.
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 2500)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.run_job(&job.id).await.unwrap();
        assert_eq!(engine.state.lock().unwrap().start_calls, 5);
        assert_eq!(quota_used(&orch), 1000);
    }

    #[tokio::test]
    async fn failed_status_poll_polls_the_same_copy() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.status_failures = timeouts(1));
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.run_job(&job.id).await.unwrap();
        let s = engine.state.lock().unwrap();
        assert_eq!(s.start_calls, 1);
        assert!(s.stopped.is_empty());
        drop(s);
        assert_eq!(quota_used(&orch), 1000);
    }

    #[tokio::test]
    async fn unreachable_status_stops_the_copy_before_restarting() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.status_failures = timeouts(5));
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.run_job(&job.id).await.unwrap();
        let s = engine.state.lock().unwrap();
        assert_eq!(s.start_calls, 2);
        assert_eq!(s.stopped, [1]);

        let stop = s.ops.iter().position(|op| *op == EngineOp::StopJob).unwrap();
        let restart = s
            .ops
            .iter()
            .rposition(|op| *op == EngineOp::StartAsyncCopy)
            .unwrap();
        assert!(stop < restart);
        drop(s);
        assert_eq!(quota_used(&orch), 1000);
    }

    #[tokio::test]
    async fn remote_failure_fails_the_batch() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| {
            s.remote_failure = Some(EngineFailure::new(FailureReason::NotFound, "bucket gone"));
        });
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine.clone(), files, &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::NotFound);
        assert_eq!(err.account(), Some("sa-0"));
        assert_eq!(engine.state.lock().unwrap().start_calls, 1);
        assert_eq!(
            orch.job(&job.id).unwrap().error().unwrap().message,
            err.to_string()
        );
    }

    #[tokio::test]
    async fn copy_time_limit_stops_each_attempt() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.never_finish = true);
        let mut config = config_with(&[("sa-0", 10_000)]);
        config.engine.copy_timeout_secs = 5;
        let enumerator = Arc::new(MockEnumerator::listing(vec![ListedFile::new("a.bin", 1000)]));
        let orch = orchestrator_with(config, engine.clone(), enumerator);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::ConnectionTimeout);
        let s = engine.state.lock().unwrap();
        assert_eq!(s.start_calls, 5);
        assert_eq!(s.stopped, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn enumeration_failures_are_retried() {
        tokio::time::pause();
        let engine = MockEngine::with(|_| {});
        let enumerator = Arc::new(MockEnumerator {
            listing: vec![ListedFile::new("a.bin", 1000)],
            failures: Mutex::new(timeouts(2)),
            ..Default::default()
        });
        let orch = orchestrator_with(config_with(&[("sa-0", 10_000)]), engine, enumerator.clone());
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let summary = orch.run_job(&job.id).await.unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(enumerator.calls(), 3);
    }

    #[tokio::test]
    async fn hung_enumeration_times_out() {
        tokio::time::pause();
        let engine = MockEngine::with(|_| {});
        let enumerator = Arc::new(MockEnumerator {
            hang: true,
            ..Default::default()
        });
        let orch = orchestrator_with(
            config_with(&[("sa-0", 10_000)]),
            engine.clone(),
            enumerator.clone(),
        );
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::ConnectionTimeout);
        assert_eq!(enumerator.calls(), 5);
        assert_eq!(engine.state.lock().unwrap().start_calls, 0);
    }

    #[tokio::test]
    async fn overshoot_is_attributed() {
        tokio::time::pause();
        let engine = MockEngine::with(|s| s.finished_transferred = 1500);
        let files = vec![ListedFile::new("a.bin", 1000)];
        let orch = orchestrator(engine, files, &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let summary = orch.run_job(&job.id).await.unwrap();
        assert_eq!(summary.transferred_bytes, 1500);
        assert_eq!(quota_used(&orch), 1500);
    }

    #[tokio::test]
    async fn abort_after_finish_reports_terminal_state() {
        tokio::time::pause();
        let engine = MockEngine::with(|_| {});
        let orch = orchestrator(engine, vec![ListedFile::new("a.bin", 10)], &[("sa-0", 10_000)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        orch.start_job(&job.id).unwrap().await.unwrap().unwrap();
        match orch.abort_job(&job.id) {
            Err(OrchestratorError::InvalidTransition { from, .. }) => {
                assert_eq!(from, JobStatus::Completed)
            }
            other => panic!("unexpected abort result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lifecycle_misuse_is_rejected() {
        let engine = MockEngine::with(|_| {});
        let orch = orchestrator(engine, Vec::new(), &[("sa-0", 10)]);
        let job = orch.create_job(JobRequest::new("a:", "b:")).unwrap();

        let err = orch.abort_job(&job.id).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InvalidTransition);

        // Nothing to move: vacuously complete.
        let summary = orch.run_job(&job.id).await.unwrap();
        assert_eq!(summary.files, 0);
        let p = orch.job(&job.id).unwrap().counters().progress();
        assert_eq!((p.file_percent, p.byte_percent), (100.0, 100.0));

        let err = orch.run_job(&job.id).await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InvalidTransition);
        assert_eq!(orch.job(&job.id).unwrap().status(), JobStatus::Completed);

        assert_eq!(
            orch.run_job("nope").await.unwrap_err().reason(),
            ErrorReason::JobNotFound
        );
        assert!(orch.create_job(JobRequest::default()).is_err());
        assert_eq!(orch.jobs().len(), 1);
    }

    #[tokio::test]
    async fn engine_passthrough_operations() {
        let engine = MockEngine::with(|_| {});
        let orch = orchestrator(engine.clone(), Vec::new(), &[]);

        orch.set_bandwidth_limit("10M").await.unwrap();
        assert_eq!(engine.state.lock().unwrap().bandwidth.as_deref(), Some("10M"));

        let remotes = orch.list_remotes().await.unwrap();
        assert_eq!(remotes[0].name, "gdrive");
    }

    #[tokio::test]
    async fn metrics_lookups() {
        let orch = orchestrator(MockEngine::with(|_| {}), Vec::new(), &[]);
        assert_eq!(orch.metrics("known").await.unwrap()["avgSpeed"], 1024);
        assert_eq!(
            orch.metrics("other").await.unwrap_err().reason(),
            ErrorReason::NotFound
        );
        assert!(matches!(
            orch.recommendations("known").await,
            Err(OrchestratorError::Metrics(_))
        ));
    }

    #[tokio::test]
    async fn preflight_updates_are_relayed() {
        let orch = orchestrator(MockEngine::with(|_| {}), Vec::new(), &[]);
        let mut rx = orch.events().subscribe(ALL_JOBS_TOPIC);
        orch.publish_preflight("check-1", json!({ "stage": "auth", "ok": true }));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, PushEventKind::Preflight);
        assert_eq!(ev.payload["jobId"], "check-1");
        assert_eq!(ev.payload["stage"], "auth");
    }
}
