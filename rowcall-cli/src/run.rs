//! One CLI run: read, call, write.

use crate::config::CliConfig;
use crate::error::CliError;
use crate::jsonl;
use rowcall_core::{validate_column_input, EngineConfig, RowcallError, Table};
use rowcall_engine::{
    AssembledOutput, HttpBatchCall, HttpEndpoint, HttpRowCall, Parallelizer, RemoteCall,
    ResponseFormatter,
};
use std::sync::Arc;

/// Build the HTTP call matching the engine's batching mode.
pub fn remote_call(config: &CliConfig, engine: &EngineConfig) -> Result<RemoteCall, CliError> {
    let mut endpoint = HttpEndpoint::new(&config.endpoint.service, &config.endpoint.url);
    if let Some(key) = config.api_key()? {
        endpoint = endpoint.with_api_key(key);
    }

    let call = if engine.api_support_batch {
        let mut call = HttpBatchCall::new(endpoint).with_keys(config.endpoint.batch_keys.clone());
        if let Some(column) = &config.endpoint.text_column {
            call = call.with_text_column(column);
        }
        RemoteCall::batch(call)
    } else {
        let mut call = HttpRowCall::new(endpoint);
        if let Some(column) = &config.endpoint.text_column {
            call = call.with_text_column(column);
        }
        RemoteCall::row(call)
    };
    Ok(call)
}

/// Run `call` over `input` with `engine` settings.
pub async fn execute(
    input: &Table,
    engine: EngineConfig,
    text_column: Option<&str>,
    call: RemoteCall,
    formatter: Option<Arc<dyn ResponseFormatter>>,
) -> Result<AssembledOutput, CliError> {
    if let Some(column) = text_column {
        validate_column_input(column, input.column_names()).map_err(RowcallError::from)?;
    }
    let mut parallelizer = Parallelizer::new(engine)?;
    if let Some(formatter) = formatter {
        parallelizer = parallelizer.with_formatter(formatter);
    }
    let output = parallelizer.run(input, call).await?;
    Ok(output)
}

/// Full run from a loaded config. Returns the assembled output after writing it.
pub async fn run(config: &CliConfig) -> Result<AssembledOutput, CliError> {
    let engine = config.engine()?;
    let input = jsonl::read_table_from_path(&config.input)?;
    tracing::info!(
        path = %config.input.display(),
        rows = input.len(),
        columns = input.column_names().len(),
        "Loaded input table"
    );

    let call = remote_call(config, &engine)?;
    let formatter = config
        .formatter()
        .map(|f| Arc::new(f) as Arc<dyn ResponseFormatter>);
    let output = execute(
        &input,
        engine,
        config.endpoint.text_column.as_deref(),
        call,
        formatter,
    )
    .await?;

    jsonl::write_table_to_path(&config.output, &output.table)?;
    tracing::info!(path = %config.output.display(), rows = output.table.len(), "Wrote output table");
    Ok(output)
}
