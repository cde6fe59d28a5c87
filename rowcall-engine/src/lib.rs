//! ROWCALL Engine - parallel per-row remote calls
//!
//! Applies a user-supplied remote call to every row of a [`Table`], with a
//! shared rate limit, bounded retries, a choice between aborting and logging
//! per-row failures, and optional batching. Results come back aligned with the
//! input rows as appended columns.
//!
//! [`Table`]: rowcall_core::Table

pub mod assembler;
pub mod batch;
pub mod call;
pub mod caller;
pub mod dispatcher;
pub mod formatter;
pub mod http;
pub mod limiter;
pub mod parallelizer;
pub mod retry;

pub use assembler::{AssembledOutput, ResultAssembler, RunSummary};
pub use batch::{correlate, BatchEntry, BatchEntryError, BatchResponse, BatchResponseKeys};
pub use call::{batch_call_fn, row_call_fn, BatchCall, BatchCallFn, RowCall, RowCallFn};
pub use caller::{CallPipeline, DeclaredErrors, UnitCaller};
pub use dispatcher::{DispatchProgress, Dispatcher, ProgressListener};
pub use formatter::{apply_formatter, ExtractField, JsonPointerFormatter, ResponseFormatter};
pub use http::{HttpBatchCall, HttpEndpoint, HttpRowCall};
pub use limiter::CallLimiter;
pub use parallelizer::{Parallelizer, RemoteCall};
pub use retry::RetryPolicy;

pub use rowcall_core::{EngineConfig, ErrorHandling, RowcallError, RowcallResult, Table};
