//! Seams to the external transfer engine and file enumerator.
//!
//! The host implements [`TransferEngine`] on top of whatever RPC transport
//! reaches the engine. [`EngineClient`] layers typed operations and call
//! timeouts over it, so the orchestrator never waits on the engine without
//! a bound.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cloudhaul_planner::{CompressionPlan, ConversionPlan, Lane, ListedFile, Tooling};
use cloudhaul_protocol::envelope::parse_reply;
use cloudhaul_protocol::{
    EngineFailure, EngineOp, EngineRequest, FailureReason, Remote, RemoteJobStatus,
    StartCopyResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::job::StreamConfig;

/// Boxed future returned by the engine seams.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineFailure>> + Send + 'a>>;

/// Raw request/response access to the transfer engine.
pub trait TransferEngine: Send + Sync {
    /// Performs one named operation and returns its JSON reply.
    fn call(&self, request: EngineRequest) -> EngineFuture<'_, serde_json::Value>;
}

/// Lists the files under a source.
pub trait FileEnumerator: Send + Sync {
    fn list_files(&self, source: String) -> EngineFuture<'_, Vec<ListedFile>>;
}

/// Per-batch copy settings passed as `config` to `startAsyncCopy`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyConfig {
    /// Destination account the batch is billed to.
    pub account: String,
    pub lane: Lane,
    pub batch: usize,
    /// Source-relative paths in this batch.
    pub files: Vec<String>,
    pub transfers: u32,
    pub checkers: u32,
    pub stream: StreamConfig,
    /// Executor capability the batch needs (convert lane only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooling: Option<Tooling>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversions: Vec<ConversionPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compressions: Vec<CompressionPlan>,
}

/// Parameters of `startAsyncCopy`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub src_fs: String,
    pub dst_fs: String,
    pub config: CopyConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobIdParams {
    job_id: u64,
}

#[derive(Serialize)]
struct RateParams<'a> {
    rate: &'a str,
}

#[derive(Deserialize)]
struct RemotesReply {
    #[serde(default)]
    remotes: Vec<Remote>,
}

/// Typed, time-bounded operations over a [`TransferEngine`].
#[derive(Clone)]
pub struct EngineClient {
    engine: Arc<dyn TransferEngine>,
    call_timeout: Duration,
}

impl EngineClient {
    pub fn new(engine: Arc<dyn TransferEngine>, call_timeout: Duration) -> Self {
        Self {
            engine,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn call(&self, request: EngineRequest) -> Result<serde_json::Value, EngineFailure> {
        let op = request.op;
        trace!(%op, "engine call");
        match tokio::time::timeout(self.call_timeout, self.engine.call(request)).await {
            Ok(reply) => reply,
            Err(_) => {
                debug!(%op, timeout = ?self.call_timeout, "engine call timed out");
                Err(EngineFailure::new(
                    FailureReason::ConnectionTimeout,
                    format!("{op} timed out after {:?}", self.call_timeout),
                ))
            }
        }
    }

    async fn call_typed<T: for<'de> Deserialize<'de>>(
        &self,
        request: EngineRequest,
    ) -> Result<T, EngineFailure> {
        let op = request.op;
        let reply = self.call(request).await?;
        parse_reply(reply).map_err(|e| malformed(op, e))
    }

    pub async fn list_remotes(&self) -> Result<Vec<Remote>, EngineFailure> {
        let reply: RemotesReply = self
            .call_typed(EngineRequest::bare(EngineOp::ListRemotes))
            .await?;
        Ok(reply.remotes)
    }

    /// Starts a copy and returns the engine's job id.
    pub async fn start_async_copy(&self, request: &CopyRequest) -> Result<u64, EngineFailure> {
        let req = EngineRequest::new(EngineOp::StartAsyncCopy, request)
            .map_err(|e| malformed(EngineOp::StartAsyncCopy, e))?;
        let reply: StartCopyResponse = self.call_typed(req).await?;
        Ok(reply.job_id)
    }

    pub async fn get_job_status(&self, job_id: u64) -> Result<RemoteJobStatus, EngineFailure> {
        let req = EngineRequest::new(EngineOp::GetJobStatus, &JobIdParams { job_id })
            .map_err(|e| malformed(EngineOp::GetJobStatus, e))?;
        self.call_typed(req).await
    }

    pub async fn stop_job(&self, job_id: u64) -> Result<(), EngineFailure> {
        let req = EngineRequest::new(EngineOp::StopJob, &JobIdParams { job_id })
            .map_err(|e| malformed(EngineOp::StopJob, e))?;
        self.call(req).await.map(drop)
    }

    /// Applies a global bandwidth limit such as `10M` or `off`.
    pub async fn set_bandwidth_limit(&self, rate: &str) -> Result<(), EngineFailure> {
        let req = EngineRequest::new(EngineOp::SetBandwidthLimit, &RateParams { rate })
            .map_err(|e| malformed(EngineOp::SetBandwidthLimit, e))?;
        self.call(req).await.map(drop)
    }
}

fn malformed(op: EngineOp, err: serde_json::Error) -> EngineFailure {
    EngineFailure::new(FailureReason::Other, format!("malformed {op} payload: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies from a script and records every request.
    struct ScriptedEngine {
        replies: Mutex<Vec<Result<serde_json::Value, EngineFailure>>>,
        seen: Mutex<Vec<EngineRequest>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Result<serde_json::Value, EngineFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransferEngine for ScriptedEngine {
        fn call(&self, request: EngineRequest) -> EngineFuture<'_, serde_json::Value> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request);
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Err(EngineFailure::new(FailureReason::Other, "no reply scripted"))
                } else {
                    replies.remove(0)
                }
            })
        }
    }

    /// Never answers.
    struct HungEngine;

    impl TransferEngine for HungEngine {
        fn call(&self, _request: EngineRequest) -> EngineFuture<'_, serde_json::Value> {
            Box::pin(std::future::pending())
        }
    }

    fn client(engine: Arc<dyn TransferEngine>) -> EngineClient {
        EngineClient::new(engine, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn list_remotes_parses_reply() {
        let engine = ScriptedEngine::new(vec![Ok(serde_json::json!({
            "remotes": [{"name": "gdrive", "type": "drive"}, {"name": "s3"}]
        }))]);
        let remotes = client(engine.clone()).list_remotes().await.unwrap();
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].kind, "drive");
        assert_eq!(engine.seen.lock().unwrap()[0].op, EngineOp::ListRemotes);
    }

    #[tokio::test]
    async fn start_copy_sends_camel_case_params() {
        let engine = ScriptedEngine::new(vec![Ok(serde_json::json!({"jobId": 17}))]);
        let request = CopyRequest {
            src_fs: "gdrive:".into(),
            dst_fs: "s3:bucket".into(),
            config: CopyConfig {
                account: "sa-0".into(),
                lane: Lane::Express,
                batch: 0,
                files: vec!["a.bin".into()],
                transfers: 32,
                checkers: 64,
                stream: StreamConfig::default(),
                tooling: None,
                conversions: Vec::new(),
                compressions: Vec::new(),
            },
        };
        let id = client(engine.clone())
            .start_async_copy(&request)
            .await
            .unwrap();
        assert_eq!(id, 17);

        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0].param("srcFs"), Some(&serde_json::json!("gdrive:")));
        let config = seen[0].param("config").unwrap();
        assert_eq!(config["lane"], "express");
        assert_eq!(config["stream"]["swarmStreams"], 4);
        assert!(config.get("conversions").is_none());
    }

    #[tokio::test]
    async fn engine_failures_pass_through() {
        let engine = ScriptedEngine::new(vec![Err(EngineFailure::new(
            FailureReason::NotFound,
            "job 9 not found",
        ))]);
        let err = client(engine).get_job_status(9).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::NotFound);
    }

    #[tokio::test]
    async fn malformed_reply_is_reported() {
        let engine = ScriptedEngine::new(vec![Ok(serde_json::json!({"status": 3}))]);
        let err = client(engine).get_job_status(1).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::Other);
        assert!(err.error.contains("getJobStatus"));
    }

    #[tokio::test]
    async fn hung_calls_time_out() {
        tokio::time::pause();
        let err = client(Arc::new(HungEngine))
            .set_bandwidth_limit("10M")
            .await
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::ConnectionTimeout);
    }
}
