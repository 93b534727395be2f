use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on a single request/response call into the transfer engine.
pub const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between remote job status polls.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Named operation understood by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineOp {
    #[serde(rename = "listRemotes")]
    ListRemotes,
    #[serde(rename = "startAsyncCopy")]
    StartAsyncCopy,
    #[serde(rename = "getJobStatus")]
    GetJobStatus,
    #[serde(rename = "stopJob")]
    StopJob,
    #[serde(rename = "setBandwidthLimit")]
    SetBandwidthLimit,
}

impl EngineOp {
    /// The operation name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListRemotes => "listRemotes",
            Self::StartAsyncCopy => "startAsyncCopy",
            Self::GetJobStatus => "getJobStatus",
            Self::StopJob => "stopJob",
            Self::SetBandwidthLimit => "setBandwidthLimit",
        }
    }
}

impl std::fmt::Display for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
