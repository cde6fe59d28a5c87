//! Response formatting
//!
//! A [`ResponseFormatter`] expands the raw response column of an assembled
//! output into readable columns. The new columns sit between the input columns
//! and the generated API columns, which always stay last.

use crate::assembler::AssembledOutput;
use rowcall_core::{allocate, safe_json_loads, ErrorHandling, RowcallError, RowcallResult, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

const FORMATTED_COLUMN_DESCRIPTION: &str = "Value extracted from the API response";

/// Turns one parsed response into extra output cells.
pub trait ResponseFormatter: Send + Sync {
    /// Logical names of the extra columns, before prefixing.
    fn columns(&self) -> Vec<String>;

    /// One cell per entry of [`ResponseFormatter::columns`].
    ///
    /// Rows without a response are formatted from an empty object.
    fn format(&self, response: &Value) -> Vec<Value>;
}

// ============================================================================
// JSON POINTER FORMATTER
// ============================================================================

/// One extracted column: its logical name and a JSON pointer into the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractField {
    pub column: String,
    /// RFC 6901 pointer, e.g. `/documentSentiment/score`.
    pub pointer: String,
}

/// Extracts a fixed set of JSON pointers. Missing values become `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPointerFormatter {
    fields: Vec<ExtractField>,
}

impl JsonPointerFormatter {
    pub fn new(fields: Vec<ExtractField>) -> Self {
        Self { fields }
    }

    pub fn field(mut self, column: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.fields.push(ExtractField {
            column: column.into(),
            pointer: pointer.into(),
        });
        self
    }

    pub fn fields(&self) -> &[ExtractField] {
        &self.fields
    }
}

impl ResponseFormatter for JsonPointerFormatter {
    fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column.clone()).collect()
    }

    fn format(&self, response: &Value) -> Vec<Value> {
        self.fields
            .iter()
            .map(|f| response.pointer(&f.pointer).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Expand `response_column` of `output` with `formatter`.
///
/// Each response is parsed with [`safe_json_loads`] under `policy`: under
/// `log` an unparsable response formats as an empty object, under `fail` it
/// aborts. Extra column names are allocated with `prefix` against the current
/// schema. The generated API columns are moved after the extra columns.
pub fn apply_formatter(
    output: AssembledOutput,
    formatter: &dyn ResponseFormatter,
    response_column: &str,
    prefix: Option<&str>,
    policy: ErrorHandling,
) -> RowcallResult<AssembledOutput> {
    tracing::info!("Formatting API results...");
    let AssembledOutput {
        table,
        summary,
        descriptions,
    } = output;

    let response_index =
        table
            .column_index(response_column)
            .ok_or_else(|| RowcallError::Assembly {
                reason: format!("response column '{}' is missing", response_column),
            })?;

    let mut taken: HashSet<String> = table.column_names().iter().cloned().collect();
    let mut extra = Vec::new();
    for logical in formatter.columns() {
        let name = allocate(&logical, &taken, prefix)?;
        taken.insert(name.clone());
        extra.push(name);
    }

    let api_columns: Vec<&str> = descriptions.iter().map(|(name, _)| name.as_str()).collect();
    let leading: Vec<usize> = table
        .column_names()
        .iter()
        .enumerate()
        .filter(|(_, name)| !api_columns.contains(&name.as_str()))
        .map(|(i, _)| i)
        .collect();
    let trailing = api_columns
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| RowcallError::Assembly {
                reason: format!("API column '{}' is missing", name),
            })
        })
        .collect::<RowcallResult<Vec<_>>>()?;

    let names = leading
        .iter()
        .map(|&i| table.column_names()[i].clone())
        .chain(extra.iter().cloned())
        .chain(trailing.iter().map(|&i| table.column_names()[i].clone()));
    let mut formatted = Table::new(names)?;

    for (row_index, row) in table.rows().enumerate() {
        let response = parse_response(&row[response_index], policy).map_err(|e| {
            RowcallError::Format {
                row: row_index,
                reason: e.to_string(),
            }
        })?;
        let cells = formatter.format(&response);
        if cells.len() != extra.len() {
            return Err(RowcallError::Format {
                row: row_index,
                reason: format!("expected {} cells, got {}", extra.len(), cells.len()),
            });
        }

        let mut values: Vec<Value> = leading.iter().map(|&i| row[i].clone()).collect();
        values.extend(cells);
        values.extend(trailing.iter().map(|&i| row[i].clone()));
        formatted.push_row(values)?;
    }

    let descriptions = extra
        .into_iter()
        .map(|name| (name, FORMATTED_COLUMN_DESCRIPTION))
        .chain(descriptions)
        .collect();

    tracing::info!("Formatting API results: Done.");
    Ok(AssembledOutput {
        table: formatted,
        summary,
        descriptions,
    })
}

/// An empty cell (failed or skipped row) parses as an empty object.
fn parse_response(cell: &Value, policy: ErrorHandling) -> Result<Value, serde_json::Error> {
    match cell {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
        Value::String(text) => safe_json_loads(text, policy),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Ok(other.clone()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
