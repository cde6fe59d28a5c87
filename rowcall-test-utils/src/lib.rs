//! ROWCALL Test Utilities
//!
//! Centralized test infrastructure for the ROWCALL workspace:
//! - Scripted remote calls (row and batch) for driving the engine
//! - Proptest generators for tables, configs and errors
//! - Test fixtures for common scenarios
//! - Custom assertions for ROWCALL-specific validation

// Re-export core types for convenience
pub use rowcall_core::{
    chunk_units, Batch, CallError, CallResult, ColumnNameSet, ColumnRole, ConfigError,
    EngineConfig, ErrorHandling, ErrorKind, RowcallError, RowcallResult, Table, Unit,
};
pub use rowcall_engine::{
    BatchCall, BatchEntry, BatchEntryError, BatchResponse, Parallelizer, RemoteCall, RowCall,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Service label used by every mock call.
pub const MOCK_SERVICE: &str = "mock";

/// Echoed response for a unit: its `text` cell when present, else the whole row.
fn echo(unit: &Unit) -> Value {
    match unit.get("text") {
        Some(text) => text.clone(),
        None => unit.to_json(),
    }
}

// ============================================================================
// MOCK ROW CALLS
// ============================================================================

/// Row call that echoes its input and records when it was called.
#[derive(Debug, Default)]
pub struct EchoCall {
    delay: Option<Duration>,
    calls: Mutex<Vec<Instant>>,
}

impl EchoCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Start instants of every call, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RowCall for EchoCall {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Instant::now());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(echo(unit))
    }

    fn service_name(&self) -> &str {
        MOCK_SERVICE
    }
}

/// Row call whose latency shrinks with the row position, so later rows finish
/// first.
#[derive(Debug, Clone)]
pub struct ReverseLatencyCall {
    rows: usize,
    step: Duration,
}

impl ReverseLatencyCall {
    pub fn new(rows: usize, step: Duration) -> Self {
        Self { rows, step }
    }
}

#[async_trait]
impl RowCall for ReverseLatencyCall {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        let remaining = self.rows.saturating_sub(unit.position()) as u32;
        tokio::time::sleep(self.step * remaining).await;
        Ok(echo(unit))
    }

    fn service_name(&self) -> &str {
        MOCK_SERVICE
    }
}

/// Row call that fails each unit a fixed number of times, then echoes.
#[derive(Debug)]
pub struct ScriptedCall {
    failures_per_unit: u32,
    error: CallError,
    attempts: Mutex<HashMap<usize, u32>>,
    total: AtomicU32,
}

impl ScriptedCall {
    /// Fail every unit `failures_per_unit` times with `error` before succeeding.
    pub fn failing_times(failures_per_unit: u32, error: CallError) -> Self {
        Self {
            failures_per_unit,
            error,
            attempts: Mutex::new(HashMap::new()),
            total: AtomicU32::new(0),
        }
    }

    /// Total invocations across all units.
    pub fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    /// Invocations for the unit at `position`.
    pub fn calls_for(&self, position: usize) -> u32 {
        self.attempts
            .lock()
            .map(|a| a.get(&position).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl RowCall for ScriptedCall {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let attempt = match self.attempts.lock() {
            Ok(mut attempts) => {
                let count = attempts.entry(unit.position()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => return Err(self.error.clone()),
        };
        if attempt <= self.failures_per_unit {
            Err(self.error.clone())
        } else {
            Ok(echo(unit))
        }
    }

    fn service_name(&self) -> &str {
        MOCK_SERVICE
    }
}

/// Row call that always fails with the same error on selected rows.
#[derive(Debug, Clone)]
pub struct FailingCall {
    error: CallError,
    positions: Option<HashSet<usize>>,
}

impl FailingCall {
    /// Fail every row.
    pub fn always(error: CallError) -> Self {
        Self {
            error,
            positions: None,
        }
    }

    /// Fail only the rows at `positions`, echo the rest.
    pub fn at(positions: impl IntoIterator<Item = usize>, error: CallError) -> Self {
        Self {
            error,
            positions: Some(positions.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RowCall for FailingCall {
    async fn call(&self, unit: &Unit) -> Result<Value, CallError> {
        let fails = self
            .positions
            .as_ref()
            .map_or(true, |p| p.contains(&unit.position()));
        if fails {
            Err(self.error.clone())
        } else {
            Ok(echo(unit))
        }
    }

    fn service_name(&self) -> &str {
        MOCK_SERVICE
    }
}

// ============================================================================
// MOCK BATCH CALLS
// ============================================================================

/// How [`MockBatchCall`] shapes its responses.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchScript {
    /// Every entry succeeds, listed in batch order.
    InOrder,
    /// Every entry succeeds, listed in reverse order.
    Reversed,
    /// Rows at these original positions are reported as entry errors.
    ErrorAt(HashSet<usize>),
    /// The last entry of each batch is left out.
    OmitLast,
    /// The first entry of each batch is reported twice.
    DuplicateFirst,
    /// The whole call fails.
    WholeFailure(CallError),
}

/// Batch call driven by a [`BatchScript`]; records the size of every batch.
#[derive(Debug)]
pub struct MockBatchCall {
    script: BatchScript,
    sizes: Mutex<Vec<usize>>,
}

impl MockBatchCall {
    pub fn new(script: BatchScript) -> Self {
        Self {
            script,
            sizes: Mutex::new(Vec::new()),
        }
    }

    /// Sizes of the batches received, sorted ascending.
    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes = self.sizes.lock().map(|s| s.clone()).unwrap_or_default();
        sizes.sort_unstable();
        sizes
    }
}

#[async_trait]
impl BatchCall for MockBatchCall {
    async fn call_batch(&self, batch: &Batch) -> Result<BatchResponse, CallError> {
        if let Ok(mut sizes) = self.sizes.lock() {
            sizes.push(batch.len());
        }
        if let BatchScript::WholeFailure(err) = &self.script {
            return Err(err.clone());
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (position, unit) in batch.units().iter().enumerate() {
            match &self.script {
                BatchScript::ErrorAt(failing) if failing.contains(&unit.position()) => {
                    errors.push(BatchEntryError {
                        position,
                        message: format!("cannot process row {}", unit.position()),
                        error_type: Some("UnprocessableInput".to_string()),
                        raw: Some(json!({"index": position}).to_string()),
                    });
                }
                BatchScript::OmitLast if position + 1 == batch.len() => {}
                _ => results.push(BatchEntry {
                    position,
                    value: echo(unit),
                }),
            }
        }

        match &self.script {
            BatchScript::Reversed => results.reverse(),
            BatchScript::DuplicateFirst => {
                if let Some(first) = results.first().cloned() {
                    results.push(first);
                }
            }
            _ => {}
        }
        Ok(BatchResponse::new(results, errors))
    }

    fn service_name(&self) -> &str {
        MOCK_SERVICE
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for ROWCALL types.

    use super::*;
    use proptest::prelude::*;

    /// Column names that never collide with the `api_` prefix.
    pub fn arb_column_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}".prop_filter("reserved prefix", |s| !s.starts_with("api"))
    }

    /// A `text` column plus up to three other distinct columns, 0..max_rows rows.
    pub fn arb_table(max_rows: usize) -> impl Strategy<Value = Table> {
        (
            prop::collection::hash_set(arb_column_name(), 0..3),
            prop::collection::vec("[ -~]{0,24}", 0..max_rows),
        )
            .prop_map(|(extra, texts)| {
                let mut columns = vec!["text".to_string()];
                columns.extend(extra.into_iter().filter(|c| c != "text"));
                let width = columns.len();
                let mut table = Table::new(columns).expect("generated column names are unique");
                for (i, text) in texts.into_iter().enumerate() {
                    let mut row = vec![Value::String(text)];
                    row.extend((1..width).map(|c| json!(i * width + c)));
                    let _ = table.push_row(row);
                }
                table
            })
    }

    pub fn arb_error_handling() -> impl Strategy<Value = ErrorHandling> {
        prop_oneof![Just(ErrorHandling::Fail), Just(ErrorHandling::Log)]
    }

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::Transient),
            Just(ErrorKind::RemoteFailure),
            Just(ErrorKind::Validation),
            Just(ErrorKind::Fatal),
        ]
    }

    /// Errors the engine retries.
    pub fn arb_transient_error() -> impl Strategy<Value = CallError> {
        prop_oneof![
            (0u64..50).prop_map(|ms| CallError::RateLimited {
                service: MOCK_SERVICE.to_string(),
                retry_after_ms: ms,
            }),
            "[a-z ]{1,20}".prop_map(|reason| CallError::Connection {
                service: MOCK_SERVICE.to_string(),
                reason,
            }),
        ]
    }

    /// Errors the engine never retries.
    pub fn arb_permanent_error() -> impl Strategy<Value = CallError> {
        prop_oneof![
            (400u16..499, "[a-z ]{1,20}").prop_map(|(status, message)| {
                CallError::RequestFailed {
                    service: MOCK_SERVICE.to_string(),
                    status,
                    message,
                }
            }),
            "[a-z ]{1,20}".prop_map(|reason| CallError::InvalidResponse {
                service: MOCK_SERVICE.to_string(),
                reason,
            }),
        ]
    }

    /// Configs that pass validation and run quickly in tests.
    pub fn arb_valid_config() -> impl Strategy<Value = EngineConfig> {
        (
            1usize..8,
            1usize..6,
            arb_error_handling(),
            any::<bool>(),
            1u32..4,
            any::<bool>(),
        )
            .prop_map(|(workers, batch_size, error_handling, verbose, attempts, batched)| {
                EngineConfig {
                    parallel_workers: workers,
                    api_support_batch: batched,
                    batch_size,
                    error_handling,
                    verbose,
                    retry_attempts: attempts,
                    retry_initial_backoff_ms: 1,
                    retry_max_backoff_ms: 4,
                    ..EngineConfig::default()
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built tables and configs for common scenarios.

    use super::*;

    /// `id` and `text` columns with `rows` rows: `(i, "doc i")`.
    pub fn text_table(rows: usize) -> Table {
        let mut table = Table::new(["id", "text"]).expect("fixture table is well-formed");
        for i in 0..rows {
            table
                .push_row(vec![json!(i), json!(format!("doc {}", i))])
                .expect("fixture table is well-formed");
        }
        table
    }

    /// A small table of product reviews, one of them empty.
    pub fn reviews_table() -> Table {
        let records = vec![
            json!({"review_id": "r1", "text": "Arrived quickly and works great."}),
            json!({"review_id": "r2", "text": "Stopped charging after a week."}),
            json!({"review_id": "r3", "text": ""}),
            json!({"review_id": "r4", "text": "Decent value for the price."}),
        ];
        Table::from_json_values(records).expect("fixture records are objects")
    }

    /// Fast-retrying config with the given policy and worker count.
    pub fn fast_config(error_handling: ErrorHandling, workers: usize) -> EngineConfig {
        EngineConfig {
            parallel_workers: workers,
            error_handling,
            retry_attempts: 3,
            retry_initial_backoff_ms: 1,
            retry_max_backoff_ms: 5,
            ..EngineConfig::default()
        }
    }

    /// Batched variant of [`fast_config`].
    pub fn batch_config(error_handling: ErrorHandling, batch_size: usize) -> EngineConfig {
        EngineConfig {
            api_support_batch: true,
            batch_size,
            ..fast_config(error_handling, 2)
        }
    }

    pub fn connection_error() -> CallError {
        CallError::Connection {
            service: MOCK_SERVICE.to_string(),
            reason: "connection reset by peer".to_string(),
        }
    }

    pub fn bad_request() -> CallError {
        CallError::RequestFailed {
            service: MOCK_SERVICE.to_string(),
            status: 400,
            message: "Invalid input".to_string(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for ROWCALL-specific validation.

    use super::*;
    use rowcall_engine::AssembledOutput;

    /// Assert that a RowcallResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RowcallResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a RowcallResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &RowcallResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a RowcallResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RowcallResult<T>) {
        match result {
            Err(RowcallError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a RowcallResult is a call failure of the given kind.
    #[track_caller]
    pub fn assert_call_error_kind<T: std::fmt::Debug>(
        result: &RowcallResult<T>,
        kind: ErrorKind,
    ) {
        match result {
            Err(RowcallError::Call { source, .. }) => {
                assert_eq!(source.kind(), kind, "Wrong error kind in {:?}", source);
            }
            other => panic!("Expected Call error of kind {}, got: {:?}", kind, other),
        }
    }

    /// Assert that a config passes validation.
    #[track_caller]
    pub fn assert_config_valid(config: &EngineConfig) {
        if let Err(e) = config.validate() {
            panic!("Expected valid config, got: {}", e);
        }
    }

    /// Assert that `output` keeps every input row, in order, with the input
    /// cells untouched.
    #[track_caller]
    pub fn assert_rows_preserved(input: &Table, output: &AssembledOutput) {
        assert_eq!(output.table.len(), input.len(), "Row count changed");
        assert_eq!(
            output.summary.total(),
            input.len(),
            "Summary does not cover every row"
        );
        let width = input.column_names().len();
        assert_eq!(
            &output.table.column_names()[..width],
            input.column_names(),
            "Input columns were reordered"
        );
        for (i, (before, after)) in input.rows().zip(output.table.rows()).enumerate() {
            assert_eq!(before, &after[..width], "Row {} was altered", i);
        }
    }

    /// Assert that every cell of `column` is the empty string.
    #[track_caller]
    pub fn assert_column_empty(table: &Table, column: &str) {
        let values = table
            .column_values(column)
            .expect("fixture table is well-formed");
        for (i, value) in values.into_iter().enumerate() {
            assert_eq!(value, &json!(""), "Row {} of '{}' is not empty", i, column);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
