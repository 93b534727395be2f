//! Retry policy for failed batches.

use std::time::Duration;

use cloudhaul_protocol::ErrorReason;
use serde::{Deserialize, Serialize};

/// Exponential backoff with a fixed attempt ceiling.
///
/// Delays are deterministic: `initial × factor^(attempt-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Total attempts allowed per batch, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay in milliseconds after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exp);
        ms.min(self.max_delay_ms as f64).round() as u64
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_delay(attempt))
    }

    /// Whether a batch that has failed `attempts` times with `reason` gets
    /// another try.
    pub fn should_retry(&self, reason: ErrorReason, attempts: u32) -> bool {
        is_retryable(reason) && attempts < self.max_attempts
    }
}

/// Only connection timeouts and rate limits are worth retrying.
pub fn is_retryable(reason: ErrorReason) -> bool {
    matches!(
        reason,
        ErrorReason::ConnectionTimeout | ErrorReason::RateLimited
    )
}

/// [`RetryPolicy::backoff_delay`] with default tuning.
pub fn backoff_delay(attempt: u32) -> u64 {
    RetryPolicy::default().backoff_delay(attempt)
}

/// [`RetryPolicy::should_retry`] with default tuning.
pub fn should_retry(reason: ErrorReason, attempts: u32) -> bool {
    RetryPolicy::default().should_retry(reason, attempts)
}
