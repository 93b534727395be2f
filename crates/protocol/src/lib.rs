//! Wire types shared between the orchestration core and its external
//! collaborators: the transfer engine (request/response calls keyed by an
//! operation name) and the push layer (topic-keyed events).

pub mod constants;
pub mod envelope;
pub mod push;
pub mod reason;
pub mod types;

// Re-export primary types for convenience.
pub use constants::EngineOp;
pub use envelope::{EngineFailure, EngineRequest, FailureReason};
pub use push::{ALL_JOBS_TOPIC, PushEvent, PushEventKind, job_topic};
pub use reason::{ErrorCategory, ErrorReason};
pub use types::{Remote, RemoteJobState, RemoteJobStatus, StartCopyResponse};
