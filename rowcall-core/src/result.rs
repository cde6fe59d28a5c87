//! Per-unit call outcomes

use crate::error::{CallError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classified failure attached to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    pub kind: ErrorKind,
    /// Stable label, `<service>.<kind>`.
    pub error_type: String,
    /// Human-readable description.
    pub message: String,
    /// Diagnostic detail, only captured in verbose runs.
    pub raw: Option<String>,
}

impl CallFailure {
    /// Build a failure record from a call error.
    pub fn from_call_error(err: &CallError, verbose: bool) -> Self {
        Self {
            kind: err.kind(),
            error_type: err.error_type(),
            message: err.to_string(),
            raw: verbose.then(|| err.raw_cause()),
        }
    }
}

/// Outcome of calling the remote service for one unit.
///
/// Every unit gets exactly one of these, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    Success { response: Value },
    Failure(CallFailure),
}

impl CallResult {
    pub fn success(response: Value) -> Self {
        CallResult::Success { response }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success { .. })
    }

    pub fn response(&self) -> Option<&Value> {
        match self {
            CallResult::Success { response } => Some(response),
            CallResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&CallFailure> {
        match self {
            CallResult::Success { .. } => None,
            CallResult::Failure(f) => Some(f),
        }
    }
}
