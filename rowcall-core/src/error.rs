//! Error types for rowcall operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR KIND
// ============================================================================

/// High-level classification of a failed remote call.
///
/// Every [`CallError`] maps to exactly one kind. The kind decides whether the
/// failure is retried and whether it can be isolated to its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Quota exceeded, connection trouble, timeouts. Retried.
    Transient,
    /// The service answered with a failure for this input.
    RemoteFailure,
    /// The input itself could not be turned into a request.
    Validation,
    /// Anything unexpected. Never isolated, never retried.
    Fatal,
}

impl ErrorKind {
    /// Check if this kind of failure should be re-attempted.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Stable lowercase label used in output columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RemoteFailure => "remote_failure",
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CALL ERRORS
// ============================================================================

/// Failure returned by a user call function for one unit or batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Rate limited by {service}, retry after {retry_after_ms}ms")]
    RateLimited {
        service: String,
        retry_after_ms: u64,
    },

    #[error("Connection to {service} failed: {reason}")]
    Connection { service: String, reason: String },

    #[error("Call to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("Request to {service} failed with status {status}: {message}")]
    RequestFailed {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Invalid input for {service}: {reason}")]
    InvalidInput { service: String, reason: String },

    /// A batch response that cannot be correlated back to its units.
    #[error("Malformed batch {batch} response from {service}: {reason}")]
    MalformedBatch {
        service: String,
        batch: usize,
        reason: String,
    },

    #[error("Unexpected failure in {service}: {reason}")]
    Unexpected { service: String, reason: String },
}

impl CallError {
    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::RateLimited { .. }
            | CallError::Connection { .. }
            | CallError::Timeout { .. } => ErrorKind::Transient,
            CallError::RequestFailed { .. } | CallError::InvalidResponse { .. } => {
                ErrorKind::RemoteFailure
            }
            CallError::InvalidInput { .. } => ErrorKind::Validation,
            CallError::MalformedBatch { .. } | CallError::Unexpected { .. } => ErrorKind::Fatal,
        }
    }

    /// Check if the retrier should re-attempt this call.
    pub fn is_transient(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Name of the service (namespace) that produced the failure.
    pub fn service(&self) -> &str {
        match self {
            CallError::RateLimited { service, .. }
            | CallError::Connection { service, .. }
            | CallError::Timeout { service, .. }
            | CallError::RequestFailed { service, .. }
            | CallError::InvalidResponse { service, .. }
            | CallError::InvalidInput { service, .. }
            | CallError::MalformedBatch { service, .. }
            | CallError::Unexpected { service, .. } => service,
        }
    }

    /// Stable classification label: `<service>.<kind>`.
    pub fn error_type(&self) -> String {
        format!("{}.{}", self.service(), self.kind())
    }

    /// Delay the service asked for before the next attempt, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CallError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }

    /// Diagnostic rendering of every field, for the `error_raw` column.
    pub fn raw_cause(&self) -> String {
        format!("{:?}", self)
    }
}

// ============================================================================
// TABLE / SCHEMA ERRORS
// ============================================================================

/// Errors building or reading a table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("Column name must not be empty (position {index})")]
    EmptyColumnName { index: usize },

    #[error("Duplicate column name: {name}")]
    DuplicateColumn { name: String },

    #[error("Row {row} has {got} values, expected {expected}")]
    ArityMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Column '{name}' is not present in the input dataset")]
    ColumnNotFound { name: String },

    #[error("You must specify a valid column name")]
    MissingColumnName,

    #[error("Record {row} is not a JSON object")]
    NotAnObject { row: usize },
}

/// Column-name allocation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ColumnNameError {
    #[error("Failed to generate a unique name for '{name}' after {attempts} attempts")]
    Exhausted { name: String, attempts: usize },
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

// ============================================================================
// BATCH ERRORS
// ============================================================================

/// Batch correlation errors. Always fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch {batch}: position {position} is out of range for a batch of {size}")]
    PositionOutOfRange {
        batch: usize,
        position: usize,
        size: usize,
    },

    #[error("Batch {batch}: position {position} is reported more than once")]
    DuplicatePosition { batch: usize, position: usize },

    #[error("Batch {batch}: no result or error reported for position {position}")]
    MissingPosition { batch: usize, position: usize },

    #[error("Batch {batch}: malformed response: {reason}")]
    MalformedResponse { batch: usize, reason: String },

    #[error("Batch {batch}: API returned {count} errors: {messages:?}")]
    RemoteErrors {
        batch: usize,
        count: usize,
        messages: Vec<String>,
    },
}

// ============================================================================
// MASTER ERROR
// ============================================================================

/// Master error type for all rowcall errors.
///
/// Any of these aborts the whole invocation; isolated per-unit failures are
/// carried as [`crate::CallResult::Failure`] instead.
#[derive(Debug, Clone, Error)]
pub enum RowcallError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Column name error: {0}")]
    ColumnName(#[from] ColumnNameError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Call for unit {position} failed: {source}")]
    Call {
        position: usize,
        #[source]
        source: CallError,
    },

    #[error("Worker failed: {reason}")]
    Worker { reason: String },

    #[error("Result assembly failed: {reason}")]
    Assembly { reason: String },

    #[error("Formatting the response of row {row} failed: {reason}")]
    Format { row: usize, reason: String },
}

impl RowcallError {
    /// The underlying call failure, when the run was aborted by one.
    pub fn as_call_error(&self) -> Option<&CallError> {
        match self {
            RowcallError::Call { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for rowcall operations.
pub type RowcallResult<T> = Result<T, RowcallError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_kinds() {
        let transient = CallError::Connection {
            service: "nlp".to_string(),
            reason: "reset".to_string(),
        };
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert!(transient.is_transient());

        let remote = CallError::RequestFailed {
            service: "nlp".to_string(),
            status: 400,
            message: "bad document".to_string(),
        };
        assert_eq!(remote.kind(), ErrorKind::RemoteFailure);
        assert!(!remote.is_transient());

        let invalid = CallError::InvalidInput {
            service: "nlp".to_string(),
            reason: "not an integer".to_string(),
        };
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        let fatal = CallError::Unexpected {
            service: "nlp".to_string(),
            reason: "bug".to_string(),
        };
        assert_eq!(fatal.kind(), ErrorKind::Fatal);
        assert!(!fatal.kind().is_retriable());

        let malformed = CallError::MalformedBatch {
            service: "nlp".to_string(),
            batch: 3,
            reason: "missing index".to_string(),
        };
        assert_eq!(malformed.kind(), ErrorKind::Fatal);
        assert!(!malformed.is_transient());
        assert_eq!(malformed.error_type(), "nlp.fatal");
    }

    #[test]
    fn test_call_error_type_label() {
        let err = CallError::Timeout {
            service: "google.language".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(err.error_type(), "google.language.transient");
        assert_eq!(err.service(), "google.language");
    }

    #[test]
    fn test_call_error_display_rate_limited() {
        let err = CallError::RateLimited {
            service: "openai".to_string(),
            retry_after_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Rate limited"));
        assert!(msg.contains("openai"));
        assert!(msg.contains("1500"));
        assert_eq!(err.retry_after_ms(), Some(1500));
    }

    #[test]
    fn test_retry_after_zero_is_none() {
        let err = CallError::RateLimited {
            service: "openai".to_string(),
            retry_after_ms: 0,
        };
        assert_eq!(err.retry_after_ms(), None);
    }

    #[test]
    fn test_raw_cause_names_variant() {
        let err = CallError::InvalidResponse {
            service: "svc".to_string(),
            reason: "truncated".to_string(),
        };
        let raw = err.raw_cause();
        assert!(raw.contains("InvalidResponse"));
        assert!(raw.contains("truncated"));
    }

    #[test]
    fn test_table_error_display_column_not_found() {
        let err = TableError::ColumnNotFound {
            name: "text".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column 'text' is not present in the input dataset"
        );
    }

    #[test]
    fn test_batch_error_display_missing_position() {
        let err = BatchError::MissingPosition {
            batch: 2,
            position: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Batch 2"));
        assert!(msg.contains("position 1"));
    }

    #[test]
    fn test_rowcall_error_from_variants() {
        let table = RowcallError::from(TableError::MissingColumnName);
        assert!(matches!(table, RowcallError::Table(_)));

        let names = RowcallError::from(ColumnNameError::Exhausted {
            name: "response".to_string(),
            attempts: 1000,
        });
        assert!(matches!(names, RowcallError::ColumnName(_)));

        let config = RowcallError::from(ConfigError::MissingRequired {
            field: "rate_limit_calls".to_string(),
        });
        assert!(matches!(config, RowcallError::Config(_)));

        let batch = RowcallError::from(BatchError::DuplicatePosition {
            batch: 0,
            position: 0,
        });
        assert!(matches!(batch, RowcallError::Batch(_)));
    }

    #[test]
    fn test_rowcall_error_call_exposes_source() {
        let err = RowcallError::Call {
            position: 7,
            source: CallError::Unexpected {
                service: "svc".to_string(),
                reason: "boom".to_string(),
            },
        };
        assert!(err.to_string().contains("unit 7"));
        assert_eq!(
            err.as_call_error().map(|e| e.kind()),
            Some(ErrorKind::Fatal)
        );
    }
}
