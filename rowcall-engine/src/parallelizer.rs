//! Single entry point for one parallelized invocation

use crate::assembler::{AssembledOutput, ResultAssembler};
use crate::call::{BatchCall, RowCall};
use crate::caller::{CallPipeline, DeclaredErrors};
use crate::dispatcher::{Dispatcher, ProgressListener};
use crate::formatter::{apply_formatter, ResponseFormatter};
use rowcall_core::{
    chunk_units, CallResult, ColumnNameSet, ConfigError, EngineConfig, RowcallError,
    RowcallResult, Table,
};
use std::sync::Arc;

/// The user's remote call, one unit or one batch at a time.
#[derive(Clone)]
pub enum RemoteCall {
    Row(Arc<dyn RowCall>),
    Batch(Arc<dyn BatchCall>),
}

impl RemoteCall {
    pub fn row(call: impl RowCall + 'static) -> Self {
        RemoteCall::Row(Arc::new(call))
    }

    pub fn batch(call: impl BatchCall + 'static) -> Self {
        RemoteCall::Batch(Arc::new(call))
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, RemoteCall::Batch(_))
    }

    pub fn service_name(&self) -> &str {
        match self {
            RemoteCall::Row(call) => call.service_name(),
            RemoteCall::Batch(call) => call.service_name(),
        }
    }
}

impl std::fmt::Debug for RemoteCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.is_batch() { "Batch" } else { "Row" };
        f.debug_struct("RemoteCall")
            .field("mode", &mode)
            .field("service", &self.service_name())
            .finish()
    }
}

/// Applies a remote call to every row of a table in parallel.
///
/// Each run allocates its output column names, builds its own rate limiter,
/// dispatches the calls and reassembles the results in input order.
pub struct Parallelizer {
    config: EngineConfig,
    declared: DeclaredErrors,
    listener: Option<Arc<dyn ProgressListener>>,
    formatter: Option<Arc<dyn ResponseFormatter>>,
}

impl Parallelizer {
    /// Create a parallelizer, validating the configuration first.
    pub fn new(config: EngineConfig) -> RowcallResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            declared: DeclaredErrors::default(),
            listener: None,
            formatter: None,
        })
    }

    /// Replace the set of error kinds isolated under `log` error handling.
    pub fn with_declared_errors(mut self, declared: DeclaredErrors) -> Self {
        self.declared = declared;
        self
    }

    pub fn with_progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Expand the response column into extra columns after assembly.
    pub fn with_formatter(mut self, formatter: Arc<dyn ResponseFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Call the remote service for every row of `input`.
    ///
    /// The output has the same rows in the same order, with the generated
    /// columns appended. Under `fail` error handling the first failure aborts
    /// the run and no output is produced.
    pub async fn run(&self, input: &Table, call: RemoteCall) -> RowcallResult<AssembledOutput> {
        if call.is_batch() != self.config.api_support_batch {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("api_support_batch = {}", self.config.api_support_batch),
                option_b: format!("{:?}", call),
            }
            .into());
        }

        if self.config.api_support_batch {
            tracing::info!(
                rows = input.len(),
                batch_size = self.config.batch_size,
                workers = self.config.parallel_workers,
                service = call.service_name(),
                "Calling remote API endpoint with {} rows, chunked by {}",
                input.len(),
                self.config.batch_size
            );
        } else {
            tracing::info!(
                rows = input.len(),
                workers = self.config.parallel_workers,
                service = call.service_name(),
                "Calling remote API endpoint with {} rows",
                input.len()
            );
        }

        let names = ColumnNameSet::allocate(
            input.column_names().iter().cloned(),
            Some(self.config.column_prefix.as_str()),
        )?;
        let pipeline = Arc::new(CallPipeline::from_config(
            &self.config,
            self.declared.clone(),
        )?);

        let mut dispatcher = Dispatcher::new(self.config.parallel_workers);
        if let Some(listener) = &self.listener {
            dispatcher = dispatcher.with_listener(Arc::clone(listener));
        }

        let dispatched = match &call {
            RemoteCall::Row(row_call) => {
                dispatcher
                    .dispatch(input.units(), |unit| {
                        let pipeline = Arc::clone(&pipeline);
                        let row_call = Arc::clone(row_call);
                        async move {
                            let result = pipeline.call_unit(row_call.as_ref(), &unit).await?;
                            Ok::<_, RowcallError>(vec![(unit.position(), result)])
                        }
                    })
                    .await
            }
            RemoteCall::Batch(batch_call) => {
                let batches = chunk_units(input.units(), self.config.batch_size);
                dispatcher
                    .dispatch(batches, |batch| {
                        let pipeline = Arc::clone(&pipeline);
                        let batch_call = Arc::clone(batch_call);
                        async move { pipeline.call_batch(batch_call.as_ref(), &batch).await }
                    })
                    .await
            }
        };

        let dispatched = match dispatched {
            Ok(dispatched) => dispatched,
            Err(e) => {
                tracing::error!(error = %e, "Remote API run aborted");
                return Err(e);
            }
        };

        tracing::debug!(calls = pipeline.limiter().granted(), "Dispatch finished");

        let results: Vec<(usize, CallResult)> = dispatched
            .into_iter()
            .flat_map(|(_, unit_results)| unit_results)
            .collect();

        let response_column = names.response.clone();
        let output = ResultAssembler::new(names, self.config.error_handling, self.config.verbose)
            .assemble(input, results)?;

        match &self.formatter {
            Some(formatter) => apply_formatter(
                output,
                formatter.as_ref(),
                &response_column,
                Some(self.config.column_prefix.as_str()),
                self.config.error_handling,
            ),
            None => Ok(output),
        }
    }
}

impl std::fmt::Debug for Parallelizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallelizer")
            .field("config", &self.config)
            .field("declared", &self.declared)
            .field("has_listener", &self.listener.is_some())
            .field("has_formatter", &self.formatter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchEntry, BatchResponse};
    use crate::call::{batch_call_fn, row_call_fn};
    use rowcall_core::{Batch, CallError, ErrorHandling, Unit};
    use serde_json::json;

    fn table(rows: usize) -> Table {
        let mut table = Table::new(["text"]).unwrap();
        for i in 0..rows {
            table.push_row(vec![json!(format!("doc {}", i))]).unwrap();
        }
        table
    }

    #[test]
    fn test_new_validates_config() {
        let err = Parallelizer::new(EngineConfig {
            parallel_workers: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, RowcallError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_rejects_mode_mismatch() {
        let parallelizer = Parallelizer::new(EngineConfig {
            api_support_batch: true,
            ..Default::default()
        })
        .unwrap();
        let call = RemoteCall::row(row_call_fn("echo", |unit: Unit| async move {
            Ok(unit.to_json())
        }));
        let err = parallelizer.run(&table(2), call).await.unwrap_err();
        assert!(matches!(
            err,
            RowcallError::Config(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_rows_in_order() {
        let parallelizer = Parallelizer::new(EngineConfig {
            parallel_workers: 3,
            ..Default::default()
        })
        .unwrap();
        let call = RemoteCall::row(row_call_fn("echo", |unit: Unit| async move {
            Ok(unit.get("text").cloned().unwrap_or_default())
        }));
        let output = parallelizer.run(&table(7), call).await.unwrap();

        assert_eq!(output.table.column_names(), &["text", "api_response"]);
        for (i, row) in output.table.rows().enumerate() {
            assert_eq!(row[1], json!(format!("doc {}", i)));
        }
        assert_eq!(output.summary.succeeded, 7);
    }

    #[tokio::test]
    async fn test_run_batches() {
        let parallelizer = Parallelizer::new(EngineConfig {
            api_support_batch: true,
            batch_size: 3,
            error_handling: ErrorHandling::Log,
            ..Default::default()
        })
        .unwrap();
        let call = RemoteCall::batch(batch_call_fn("bulk", |batch: Batch| async move {
            let results = (0..batch.len())
                .rev()
                .map(|position| BatchEntry {
                    position,
                    value: json!(batch.origin_of(position)),
                })
                .collect();
            Ok::<_, CallError>(BatchResponse::new(results, vec![]))
        }));
        let output = parallelizer.run(&table(8), call).await.unwrap();

        assert_eq!(output.table.len(), 8);
        for (i, row) in output.table.rows().enumerate() {
            assert_eq!(row[1], json!(i.to_string()));
            assert_eq!(row[2], json!(""));
        }
        assert_eq!(output.summary.failed, 0);
    }

    #[tokio::test]
    async fn test_run_prefix_avoids_existing_columns() {
        let mut input = Table::new(["text", "api_response"]).unwrap();
        input.push_row(vec![json!("a"), json!("old")]).unwrap();
        let call = RemoteCall::row(row_call_fn("svc", |_unit: Unit| async { Ok(json!("new")) }));
        let output = Parallelizer::new(EngineConfig::default())
            .unwrap()
            .run(&input, call)
            .await
            .unwrap();

        assert_eq!(
            output.table.column_names(),
            &["text", "api_response", "api_response_1"]
        );
        assert_eq!(output.table.row(0).unwrap()[1], json!("old"));
        assert_eq!(output.table.row(0).unwrap()[2], json!("new"));
    }

    #[tokio::test]
    async fn test_run_with_formatter() {
        let call = RemoteCall::row(row_call_fn("nlp", |unit: Unit| async move {
            Ok(json!({"label": unit.get("text").cloned().unwrap_or_default()}))
        }));
        let formatter = crate::formatter::JsonPointerFormatter::default().field("label", "/label");
        let output = Parallelizer::new(EngineConfig::default())
            .unwrap()
            .with_formatter(Arc::new(formatter))
            .run(&table(2), call)
            .await
            .unwrap();

        assert_eq!(
            output.table.column_names(),
            &["text", "api_label", "api_response"]
        );
        assert_eq!(output.table.row(1).unwrap()[1], json!("doc 1"));
    }
}
