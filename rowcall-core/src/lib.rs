//! Rowcall Core - Data Types
//!
//! Tables, units, batches, call outcomes, configuration and errors shared by
//! every rowcall crate. Nothing here is async.

pub mod columns;
pub mod config;
pub mod constants;
pub mod error;
pub mod json;
pub mod result;
pub mod table;

pub use columns::{allocate, validate_column_input, ColumnNameSet, ColumnRole};
pub use config::{EngineConfig, ErrorHandling};
pub use error::{
    BatchError, CallError, ColumnNameError, ConfigError, ErrorKind, RowcallError, RowcallResult,
    TableError,
};
pub use json::{safe_json_loads, to_cell_string};
pub use result::{CallFailure, CallResult};
pub use table::{chunk_units, Batch, Table, Unit};
