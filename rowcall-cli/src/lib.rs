//! ROWCALL CLI library: config, JSON-lines I/O and the run loop behind the
//! `rowcall` binary.

pub mod config;
pub mod error;
pub mod jsonl;
pub mod run;
pub mod telemetry;
