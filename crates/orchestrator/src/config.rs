//! Orchestrator configuration, loaded from TOML.
//!
//! Every field has a default, so an empty or missing file is valid.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cloudhaul_planner::{
    BatchSizer, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SAFETY_FACTOR, FilterMode, TaggingRules,
};
use cloudhaul_protocol::constants::{ENGINE_CALL_TIMEOUT, STATUS_POLL_INTERVAL};
use cloudhaul_quota::{DEFAULT_DAILY_QUOTA, QuotaCycle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::job::StreamConfig;
use crate::retry::RetryPolicy;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Defaults applied to job fields the caller leaves unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub transfers: u32,
    pub checkers: u32,
    pub filter_mode: FilterMode,
    pub stream: StreamConfig,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            transfers: 32,
            checkers: 64,
            filter_mode: FilterMode::Smart,
            stream: StreamConfig::default(),
        }
    }
}

/// Batch sizing and backpressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Memory budget for one batch, in bytes.
    pub available_memory: u64,
    pub safety_factor: f64,
    pub max_batch_size: usize,
    /// Batches dispatched concurrently per job.
    pub max_in_flight_batches: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            available_memory: 4 * 1024 * 1024 * 1024,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_in_flight_batches: 2,
        }
    }
}

impl BatchingConfig {
    pub fn sizer(&self) -> BatchSizer {
        BatchSizer {
            safety_factor: self.safety_factor,
            max_batch_size: self.max_batch_size,
        }
    }
}

/// Timing of transfer engine calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub call_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Upper bound on one remote copy; 0 waits indefinitely.
    pub copy_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: ENGINE_CALL_TIMEOUT.as_secs(),
            poll_interval_ms: STATUS_POLL_INTERVAL.as_millis() as u64,
            copy_timeout_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn copy_timeout(&self) -> Option<Duration> {
        (self.copy_timeout_secs > 0).then(|| Duration::from_secs(self.copy_timeout_secs))
    }
}

/// A destination account and its per-cycle byte budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default = "default_quota_limit")]
    pub quota_limit: u64,
}

fn default_quota_limit() -> u64 {
    DEFAULT_DAILY_QUOTA
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub cycle_length_hours: u32,
    /// Any cycle boundary; others are whole cycle lengths away.
    pub cycle_anchor: DateTime<Utc>,
    pub accounts: Vec<AccountConfig>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            cycle_length_hours: 24,
            cycle_anchor: DateTime::UNIX_EPOCH,
            accounts: Vec::new(),
        }
    }
}

impl QuotaConfig {
    pub fn cycle(&self) -> Result<QuotaCycle, ConfigError> {
        QuotaCycle::new(
            TimeDelta::hours(i64::from(self.cycle_length_hours)),
            self.cycle_anchor,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub job_defaults: JobDefaults,
    pub batching: BatchingConfig,
    pub retry: RetryPolicy,
    pub engine: EngineConfig,
    pub quota: QuotaConfig,
    pub tagging: TaggingRules,
}

impl OrchestratorConfig {
    /// Loads and validates a config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), accounts = config.quota.accounts.len(), "config loaded");
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.batching.max_batch_size == 0 {
            return invalid("batching.max_batch_size must be at least 1");
        }
        if self.batching.max_in_flight_batches == 0 {
            return invalid("batching.max_in_flight_batches must be at least 1");
        }
        if self.batching.available_memory == 0 {
            return invalid("batching.available_memory must be positive");
        }
        if self.batching.safety_factor.is_nan() || self.batching.safety_factor <= 0.0 {
            return invalid("batching.safety_factor must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.engine.call_timeout_secs == 0 {
            return invalid("engine.call_timeout_secs must be positive");
        }
        if self.quota.cycle_length_hours == 0 {
            return invalid("quota.cycle_length_hours must be positive");
        }

        let mut seen = HashSet::new();
        for account in &self.quota.accounts {
            if account.id.trim().is_empty() {
                return invalid("quota.accounts: empty account id");
            }
            if !seen.insert(account.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "quota.accounts: duplicate account id {}",
                    account.id
                )));
            }
        }
        Ok(())
    }
}
