//! Discriminable error reasons surfaced to callers.

use serde::{Deserialize, Serialize};

use crate::envelope::FailureReason;

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected synchronously, never retried.
    Validation,
    /// Retried with backoff up to the attempt ceiling.
    Transient,
    /// Surfaced immediately without retry.
    Permanent,
    /// Caller or programming error; the job is left unchanged.
    InvariantViolation,
}

/// Machine-readable reason carried by every externally surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    MissingParameters,
    UnsupportedConversion,
    InvalidCompressionLevel,
    InvalidConfig,
    InvalidPath,
    ConnectionRefused,
    ConnectionTimeout,
    RateLimited,
    NotFound,
    QuotaExhausted,
    InvalidTransition,
    JobNotFound,
    Aborted,
    EngineError,
}

impl ErrorReason {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingParameters
            | Self::UnsupportedConversion
            | Self::InvalidCompressionLevel
            | Self::InvalidConfig
            | Self::InvalidPath
            | Self::JobNotFound => ErrorCategory::Validation,
            Self::ConnectionTimeout | Self::RateLimited => ErrorCategory::Transient,
            Self::ConnectionRefused
            | Self::NotFound
            | Self::QuotaExhausted
            | Self::Aborted
            | Self::EngineError => ErrorCategory::Permanent,
            Self::InvalidTransition => ErrorCategory::InvariantViolation,
        }
    }

    /// Snake-case name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingParameters => "missing_parameters",
            Self::UnsupportedConversion => "unsupported_conversion",
            Self::InvalidCompressionLevel => "invalid_compression_level",
            Self::InvalidConfig => "invalid_config",
            Self::InvalidPath => "invalid_path",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionTimeout => "connection_timeout",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::QuotaExhausted => "quota_exhausted",
            Self::InvalidTransition => "invalid_transition",
            Self::JobNotFound => "job_not_found",
            Self::Aborted => "aborted",
            Self::EngineError => "engine_error",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FailureReason> for ErrorReason {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::ConnectionRefused => Self::ConnectionRefused,
            FailureReason::ConnectionTimeout => Self::ConnectionTimeout,
            FailureReason::RateLimited => Self::RateLimited,
            FailureReason::NotFound => Self::NotFound,
            FailureReason::Other => Self::EngineError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_matches_as_str() {
        for reason in [
            ErrorReason::MissingParameters,
            ErrorReason::QuotaExhausted,
            ErrorReason::InvalidTransition,
            ErrorReason::ConnectionTimeout,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn engine_reasons_keep_their_category() {
        assert_eq!(
            ErrorReason::from(FailureReason::RateLimited).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ErrorReason::from(FailureReason::NotFound).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            ErrorReason::from(FailureReason::Other),
            ErrorReason::EngineError
        );
    }

    #[test]
    fn invalid_transition_is_an_invariant_violation() {
        assert_eq!(
            ErrorReason::InvalidTransition.category(),
            ErrorCategory::InvariantViolation
        );
        assert_eq!(
            ErrorReason::UnsupportedConversion.category(),
            ErrorCategory::Validation
        );
    }
}
