use serde::{Deserialize, Serialize};

use crate::constants::EngineOp;

/// Failure reason reported by the transfer engine.
///
/// Unrecognised reasons deserialize to [`FailureReason::Other`] so a newer
/// engine never breaks reply parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ConnectionRefused,
    ConnectionTimeout,
    RateLimited,
    NotFound,
    #[serde(other)]
    Other,
}

/// Structured `{error, reason}` failure returned by any engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error} ({reason:?})")]
pub struct EngineFailure {
    pub error: String,
    pub reason: FailureReason,
}

impl EngineFailure {
    pub fn new(reason: FailureReason, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason,
        }
    }
}

/// A request to the transfer engine: a named operation plus a parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub op: EngineOp,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl EngineRequest {
    /// Creates a request with no parameters.
    pub fn bare(op: EngineOp) -> Self {
        Self {
            op,
            params: serde_json::Map::new(),
        }
    }

    /// Creates a request whose parameters are the fields of `params`.
    ///
    /// `params` must serialize to a JSON object.
    pub fn new<T: Serialize>(op: EngineOp, params: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(params)? {
            serde_json::Value::Object(params) => Ok(Self { op, params }),
            _ => Err(serde::ser::Error::custom(
                "engine request parameters must be a JSON object",
            )),
        }
    }

    /// Returns a parameter by name.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }
}

/// Deserializes an engine reply body into the given type.
pub fn parse_reply<T: for<'de> Deserialize<'de>>(
    reply: serde_json::Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(reply)
}
