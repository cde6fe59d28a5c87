//! Collision-free output column names

use crate::constants::MAX_COLUMN_NAME_ATTEMPTS;
use crate::error::{ColumnNameError, TableError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// COLUMN ROLES
// ============================================================================

/// Logical role of a generated output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Response,
    ErrorMessage,
    ErrorType,
    ErrorRaw,
}

impl ColumnRole {
    /// Every role, in output column order.
    pub const ALL: [ColumnRole; 4] = [
        ColumnRole::Response,
        ColumnRole::ErrorMessage,
        ColumnRole::ErrorType,
        ColumnRole::ErrorRaw,
    ];

    /// Logical (unprefixed) column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnRole::Response => "response",
            ColumnRole::ErrorMessage => "error_message",
            ColumnRole::ErrorType => "error_type",
            ColumnRole::ErrorRaw => "error_raw",
        }
    }

    /// Human description for output column documentation.
    pub fn description(&self) -> &'static str {
        match self {
            ColumnRole::Response => "Raw response from the API in JSON format",
            ColumnRole::ErrorMessage => "Error message from the API",
            ColumnRole::ErrorType => "Error type (service and error kind)",
            ColumnRole::ErrorRaw => "Raw error from the API",
        }
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ALLOCATION
// ============================================================================

/// Derive a column name for `logical` that is absent from `existing`.
///
/// Tries `<prefix>_<logical>` first, then appends `_1`, `_2`, ... until a free
/// name is found. The bare name counts toward the attempt bound.
pub fn allocate(
    logical: &str,
    existing: &HashSet<String>,
    prefix: Option<&str>,
) -> Result<String, ColumnNameError> {
    let base = match prefix {
        Some(p) if !p.is_empty() => format!("{}_{}", p, logical),
        _ => logical.to_string(),
    };
    if !existing.contains(&base) {
        return Ok(base);
    }
    for suffix in 1..MAX_COLUMN_NAME_ATTEMPTS {
        let candidate = format!("{}_{}", base, suffix);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ColumnNameError::Exhausted {
        name: base,
        attempts: MAX_COLUMN_NAME_ATTEMPTS,
    })
}

/// Physical names of the four generated columns for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNameSet {
    pub response: String,
    pub error_message: String,
    pub error_type: String,
    pub error_raw: String,
}

impl ColumnNameSet {
    /// Allocate every role against the existing schema.
    ///
    /// Each allocated name is added to the taken set before the next role is
    /// allocated, so roles never collide with each other either.
    pub fn allocate<I, S>(existing: I, prefix: Option<&str>) -> Result<Self, ColumnNameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut taken: HashSet<String> = existing.into_iter().map(Into::into).collect();
        let mut take = |role: ColumnRole| -> Result<String, ColumnNameError> {
            let name = allocate(role.as_str(), &taken, prefix)?;
            taken.insert(name.clone());
            Ok(name)
        };
        Ok(Self {
            response: take(ColumnRole::Response)?,
            error_message: take(ColumnRole::ErrorMessage)?,
            error_type: take(ColumnRole::ErrorType)?,
            error_raw: take(ColumnRole::ErrorRaw)?,
        })
    }

    pub fn get(&self, role: ColumnRole) -> &str {
        match role {
            ColumnRole::Response => &self.response,
            ColumnRole::ErrorMessage => &self.error_message,
            ColumnRole::ErrorType => &self.error_type,
            ColumnRole::ErrorRaw => &self.error_raw,
        }
    }
}

/// Check that `name` is a non-empty column present in `columns`.
pub fn validate_column_input(name: &str, columns: &[String]) -> Result<(), TableError> {
    if name.is_empty() {
        return Err(TableError::MissingColumnName);
    }
    if !columns.iter().any(|c| c == name) {
        return Err(TableError::ColumnNotFound {
            name: name.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
