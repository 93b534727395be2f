//! Quota accounting for destination accounts.
//!
//! Each account has a byte budget per cycle. The [`QuotaTracker`] owns the
//! ledger, serialises every mutation behind a single lock, and rotates work
//! across accounts that still have headroom.

mod account;
mod cycle;
mod tracker;

pub use account::{Account, AccountStatus, DEFAULT_DAILY_QUOTA};
pub use cycle::QuotaCycle;
pub use tracker::QuotaTracker;

use cloudhaul_protocol::ErrorReason;

/// Errors produced by the quota tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("no account has {requested} bytes of headroom")]
    QuotaExhausted { requested: u64 },

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("account already registered: {0}")]
    DuplicateAccount(String),

    #[error("quota cycle length must be positive")]
    InvalidCycle,
}

impl QuotaError {
    /// Machine-readable reason for this error.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::QuotaExhausted { .. } => ErrorReason::QuotaExhausted,
            Self::UnknownAccount(_) => ErrorReason::NotFound,
            Self::DuplicateAccount(_) | Self::InvalidCycle => ErrorReason::InvalidConfig,
        }
    }
}
