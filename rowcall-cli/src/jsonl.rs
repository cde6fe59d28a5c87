//! JSON-lines tables: one JSON object per line.

use crate::error::CliError;
use rowcall_core::{RowcallError, Table};
use serde_json::Value;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Read a table from JSON lines. Blank lines are skipped.
pub fn read_table(reader: impl Read) -> Result<Table, CliError> {
    let mut records = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|source| CliError::Json {
            line: index + 1,
            source,
        })?;
        records.push(value);
    }
    Table::from_json_values(records).map_err(|e| RowcallError::from(e).into())
}

pub fn read_table_from_path(path: &Path) -> Result<Table, CliError> {
    read_table(std::fs::File::open(path)?)
}

/// Write every row as one JSON object per line, keys in column order.
pub fn write_table(writer: impl Write, table: &Table) -> Result<(), CliError> {
    let mut writer = BufWriter::new(writer);
    for record in table.to_records() {
        let line = serde_json::to_string(&record).map_err(|source| CliError::Json {
            line: 0,
            source,
        })?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_table_to_path(path: &Path, table: &Table) -> Result<(), CliError> {
    write_table(std::fs::File::create(path)?, table)
}
