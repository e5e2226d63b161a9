//! `script-executor` entry point.
//!
//! ```bash
//! # NATS on localhost, defaults for everything else
//! script-executor
//!
//! # Explicit configuration file, JSON logs
//! script-executor --config /etc/script-executor.toml --log-format json
//! ```

use anyhow::Result;
use clap::Parser;
use script_executor_server::cli::Cli;
use script_executor_server::logging::init_logging;
use script_executor_server::shutdown::watch_signals;
use script_executor_server::worker::{connect_transport, serve};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Failed to start remote script executor: {err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(255)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    init_logging(&config.logging)?;

    tracing::info!(
        "Starting remote script executor v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::debug!(?config, "Effective configuration");

    let transport = connect_transport(&config).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    serve(transport, &config, shutdown).await?;
    tracing::info!("Remote script executor stopped");
    Ok(())
}
