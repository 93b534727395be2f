use chrono::{DateTime, TimeDelta, Utc};

use crate::QuotaError;

/// Quota cycle boundaries: `anchor + k × length` for every integer `k`.
///
/// Providers align their daily reset differently, so both the length and the
/// anchor come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCycle {
    length: TimeDelta,
    anchor: DateTime<Utc>,
}

impl Default for QuotaCycle {
    /// Daily cycles aligned to UTC midnight.
    fn default() -> Self {
        Self {
            length: TimeDelta::days(1),
            anchor: DateTime::UNIX_EPOCH,
        }
    }
}

impl QuotaCycle {
    pub fn new(length: TimeDelta, anchor: DateTime<Utc>) -> Result<Self, QuotaError> {
        if length <= TimeDelta::zero() {
            return Err(QuotaError::InvalidCycle);
        }
        Ok(Self { length, anchor })
    }

    pub fn length(&self) -> TimeDelta {
        self.length
    }

    /// The first boundary strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let len_ms = self.length.num_milliseconds().max(1);
        let elapsed_ms = (now - self.anchor).num_milliseconds();
        let cycles = elapsed_ms.div_euclid(len_ms) + 1;
        self.anchor + TimeDelta::milliseconds(len_ms.saturating_mul(cycles))
    }
}
