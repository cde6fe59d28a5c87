//! Result assembly
//!
//! Places every call result back at its unit's original row and appends the
//! generated columns after the input columns.

use rowcall_core::{
    to_cell_string, CallResult, ColumnNameSet, ColumnRole, ErrorHandling, RowcallError,
    RowcallResult, Table,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Succeeded vs failed row counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Output table plus its counts.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledOutput {
    pub table: Table,
    pub summary: RunSummary,
    /// Appended column names with their descriptions.
    pub descriptions: Vec<(String, &'static str)>,
}

/// Merges call results onto the input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAssembler {
    names: ColumnNameSet,
    policy: ErrorHandling,
    verbose: bool,
}

impl ResultAssembler {
    pub fn new(names: ColumnNameSet, policy: ErrorHandling, verbose: bool) -> Self {
        Self {
            names,
            policy,
            verbose,
        }
    }

    pub fn names(&self) -> &ColumnNameSet {
        &self.names
    }

    /// Roles that get an output column, in output order.
    ///
    /// Error columns only exist under [`ErrorHandling::Log`]; the raw error
    /// column additionally needs `verbose`.
    pub fn roles(&self) -> Vec<ColumnRole> {
        ColumnRole::ALL
            .into_iter()
            .filter(|role| match role {
                ColumnRole::Response => true,
                ColumnRole::ErrorMessage | ColumnRole::ErrorType => {
                    self.policy == ErrorHandling::Log
                }
                ColumnRole::ErrorRaw => self.policy == ErrorHandling::Log && self.verbose,
            })
            .collect()
    }

    /// Physical names of the appended columns, in output order.
    pub fn output_columns(&self) -> Vec<String> {
        self.roles()
            .into_iter()
            .map(|role| self.names.get(role).to_string())
            .collect()
    }

    /// Appended column names with their human descriptions.
    pub fn column_descriptions(&self) -> Vec<(String, &'static str)> {
        self.roles()
            .into_iter()
            .map(|role| (self.names.get(role).to_string(), role.description()))
            .collect()
    }

    /// Build the output table from `input` and one result per row.
    ///
    /// `results` pairs each result with its original row position, in any
    /// order. A missing, duplicated or out-of-range position is an error.
    pub fn assemble(
        &self,
        input: &Table,
        results: Vec<(usize, CallResult)>,
    ) -> RowcallResult<AssembledOutput> {
        let rows = input.len();
        let mut slots: Vec<Option<CallResult>> = vec![None; rows];

        for (position, result) in results {
            let slot = slots.get_mut(position).ok_or_else(|| RowcallError::Assembly {
                reason: format!("result for row {} but the input has {} rows", position, rows),
            })?;
            if slot.is_some() {
                return Err(RowcallError::Assembly {
                    reason: format!("more than one result for row {}", position),
                });
            }
            *slot = Some(result);
        }

        let placed = slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| RowcallError::Assembly {
                    reason: format!("no result for row {}", position),
                })
            })
            .collect::<RowcallResult<Vec<_>>>()?;

        let roles = self.roles();
        let columns: Vec<Vec<Value>> = roles
            .iter()
            .map(|role| placed.iter().map(|result| cell(*role, result)).collect())
            .collect();

        let table = input.with_appended_columns(&self.output_columns(), columns)?;

        let succeeded = placed.iter().filter(|r| r.is_success()).count();
        let summary = RunSummary {
            succeeded,
            failed: placed.len() - succeeded,
        };

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Remote API call results: {} rows succeeded, {} rows failed.",
            summary.succeeded,
            summary.failed
        );

        Ok(AssembledOutput {
            table,
            summary,
            descriptions: self.column_descriptions(),
        })
    }
}

fn cell(role: ColumnRole, result: &CallResult) -> Value {
    let text = match (role, result) {
        (ColumnRole::Response, CallResult::Success { response }) => to_cell_string(response),
        (ColumnRole::Response, CallResult::Failure(_)) => String::new(),
        (_, CallResult::Success { .. }) => String::new(),
        (ColumnRole::ErrorMessage, CallResult::Failure(f)) => f.message.clone(),
        (ColumnRole::ErrorType, CallResult::Failure(f)) => f.error_type.clone(),
        (ColumnRole::ErrorRaw, CallResult::Failure(f)) => f.raw.clone().unwrap_or_default(),
    };
    Value::String(text)
}

// =============================================================================
// TESTS
// =============================================================================
