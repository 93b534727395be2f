use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::QuotaError;
use crate::account::Account;
use crate::cycle::QuotaCycle;

/// Owns the account ledger.
///
/// All reads and writes go through one mutex, so concurrent attributions from
/// parallel workers never lose updates. Cycle resets are applied lazily on
/// every access using the caller-supplied `now`.
pub struct QuotaTracker {
    cycle: QuotaCycle,
    ledger: Mutex<Ledger>,
}

struct Ledger {
    accounts: Vec<Account>,
    /// Index where the next round-robin search starts.
    cursor: usize,
}

impl Ledger {
    fn reset_due(&mut self, now: DateTime<Utc>, cycle: &QuotaCycle) {
        for account in &mut self.accounts {
            if account.reset_if_due(now, cycle) {
                debug!(account = %account.id, reset_at = %account.reset_at, "quota cycle reset");
            }
        }
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Account, QuotaError> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| QuotaError::UnknownAccount(id.to_string()))
    }

    /// Round-robin over accounts that can take `estimated_bytes`.
    fn select(&mut self, estimated_bytes: u64) -> Result<usize, QuotaError> {
        let n = self.accounts.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            if self.accounts[idx].can_accept(estimated_bytes) {
                self.cursor = (idx + 1) % n;
                return Ok(idx);
            }
        }
        Err(QuotaError::QuotaExhausted {
            requested: estimated_bytes,
        })
    }
}

impl QuotaTracker {
    /// Creates an empty tracker.
    pub fn new(cycle: QuotaCycle) -> Self {
        Self {
            cycle,
            ledger: Mutex::new(Ledger {
                accounts: Vec::new(),
                cursor: 0,
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an account with a fresh cycle.
    pub fn register(
        &self,
        id: impl Into<String>,
        quota_limit: u64,
        now: DateTime<Utc>,
    ) -> Result<(), QuotaError> {
        let id = id.into();
        let mut ledger = self.ledger();
        if ledger.accounts.iter().any(|a| a.id == id) {
            return Err(QuotaError::DuplicateAccount(id));
        }
        info!(account = %id, quota_limit, "account registered");
        let reset_at = self.cycle.next_boundary(now);
        ledger.accounts.push(Account::new(id, quota_limit, reset_at));
        Ok(())
    }

    /// Picks the next account with room for `estimated_bytes` without
    /// attributing anything.
    pub fn select_account(
        &self,
        estimated_bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<Account, QuotaError> {
        let mut ledger = self.ledger();
        ledger.reset_due(now, &self.cycle);
        let idx = ledger.select(estimated_bytes)?;
        Ok(ledger.accounts[idx].clone())
    }

    /// Selects an account and attributes `estimated_bytes` to it in one step.
    ///
    /// Concurrent callers can never both claim the same headroom.
    pub fn claim(&self, estimated_bytes: u64, now: DateTime<Utc>) -> Result<Account, QuotaError> {
        let mut ledger = self.ledger();
        ledger.reset_due(now, &self.cycle);
        let idx = ledger.select(estimated_bytes)?;
        let account = &mut ledger.accounts[idx];
        account.attribute(estimated_bytes);
        debug!(
            account = %account.id,
            bytes = estimated_bytes,
            used = account.quota_used,
            "quota claimed"
        );
        Ok(account.clone())
    }

    /// Adds `bytes` to an account's usage for the current cycle.
    pub fn attribute(
        &self,
        account_id: &str,
        bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<Account, QuotaError> {
        let mut ledger = self.ledger();
        let cycle = self.cycle;
        let account = ledger.find_mut(account_id)?;
        account.reset_if_due(now, &cycle);
        account.attribute(bytes);
        Ok(account.clone())
    }

    /// Resets an account if its cycle boundary has passed. Returns whether it did.
    pub fn reset_if_due(&self, account_id: &str, now: DateTime<Utc>) -> Result<bool, QuotaError> {
        let mut ledger = self.ledger();
        let cycle = self.cycle;
        Ok(ledger.find_mut(account_id)?.reset_if_due(now, &cycle))
    }

    /// Takes an account out of rotation until its next reset.
    ///
    /// Called when the engine reports a rate-limit or quota error for it.
    pub fn mark_exhausted(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), QuotaError> {
        let mut ledger = self.ledger();
        let cycle = self.cycle;
        let account = ledger.find_mut(account_id)?;
        account.reset_if_due(now, &cycle);
        account.status = crate::AccountStatus::Exhausted;
        warn!(account = %account_id, reset_at = %account.reset_at, "account exhausted");
        Ok(())
    }

    /// Copies of every account, after applying due resets.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<Account> {
        let mut ledger = self.ledger();
        ledger.reset_due(now, &self.cycle);
        ledger.accounts.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger().accounts.is_empty()
    }
}
