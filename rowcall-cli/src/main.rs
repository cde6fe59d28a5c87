//! ROWCALL CLI entry point.

use rowcall_cli::config::CliConfig;
use rowcall_cli::run::run;
use rowcall_cli::telemetry::init_tracing;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let config = CliConfig::load()?;
    init_tracing(config.json_logs)?;

    let output = run(&config).await?;

    println!(
        "{} rows succeeded, {} rows failed",
        output.summary.succeeded, output.summary.failed
    );
    for (column, description) in &output.descriptions {
        println!("  {}: {}", column, description);
    }
    Ok(())
}
