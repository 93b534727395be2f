use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle::QuotaCycle;

/// Default per-account budget: 750 GB per cycle.
pub const DEFAULT_DAILY_QUOTA: u64 = 750 * 1000 * 1000 * 1000;

/// Whether an account takes part in rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    /// Out of rotation until the next reset.
    Exhausted,
}

/// A destination identity with its own quota.
///
/// Copies handed out by the tracker are snapshots; the ledger entry itself
/// only changes through [`QuotaTracker`](crate::QuotaTracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    /// Bytes allowed per cycle.
    pub quota_limit: u64,
    /// Bytes attributed in the current cycle.
    pub quota_used: u64,
    /// Next cycle boundary.
    pub reset_at: DateTime<Utc>,
    pub status: AccountStatus,
}

impl Account {
    pub(crate) fn new(id: String, quota_limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            id,
            quota_limit,
            quota_used: 0,
            reset_at,
            status: AccountStatus::Active,
        }
    }

    /// Bytes still available this cycle.
    pub fn headroom(&self) -> u64 {
        self.quota_limit.saturating_sub(self.quota_used)
    }

    /// Whether `estimated_bytes` can be dispatched against this account.
    pub fn can_accept(&self, estimated_bytes: u64) -> bool {
        self.status == AccountStatus::Active
            && self
                .quota_used
                .checked_add(estimated_bytes)
                .is_some_and(|total| total <= self.quota_limit)
    }

    /// Starts a new cycle if `now` has reached `reset_at`. Returns whether it did.
    pub(crate) fn reset_if_due(&mut self, now: DateTime<Utc>, cycle: &QuotaCycle) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.quota_used = 0;
        self.status = AccountStatus::Active;
        self.reset_at = cycle.next_boundary(now);
        true
    }

    pub(crate) fn attribute(&mut self, bytes: u64) {
        self.quota_used = self.quota_used.saturating_add(bytes);
        if self.quota_used >= self.quota_limit {
            self.status = AccountStatus::Exhausted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(limit: u64) -> Account {
        Account::new("sa-1".into(), limit, DateTime::UNIX_EPOCH)
    }

    #[test]
    fn can_accept_up_to_the_limit() {
        let mut a = account(100);
        a.quota_used = 60;
        assert!(a.can_accept(40));
        assert!(!a.can_accept(41));
        assert!(!a.can_accept(u64::MAX));
        assert_eq!(a.headroom(), 40);
    }

    #[test]
    fn exhausted_accounts_accept_nothing() {
        let mut a = account(100);
        a.status = AccountStatus::Exhausted;
        assert!(!a.can_accept(0));
    }

    #[test]
    fn filling_the_budget_exhausts() {
        let mut a = account(100);
        a.attribute(100);
        assert_eq!(a.status, AccountStatus::Exhausted);
    }

    #[test]
    fn reset_restores_rotation() {
        let mut a = account(100);
        a.attribute(100);
        let now = DateTime::UNIX_EPOCH + chrono::TimeDelta::hours(3);
        assert!(a.reset_if_due(now, &QuotaCycle::default()));
        assert_eq!(a.quota_used, 0);
        assert_eq!(a.status, AccountStatus::Active);
        assert_eq!(a.reset_at, DateTime::UNIX_EPOCH + chrono::TimeDelta::days(1));
        assert!(!a.reset_if_due(now, &QuotaCycle::default()));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(account(5)).unwrap();
        assert_eq!(json["quotaLimit"], 5);
        assert_eq!(json["status"], "active");
    }
}
