//! Command-line arguments.
//!
//! Flags override the configuration file and the environment.

use clap::Parser;
use script_executor_core::{LogFormat, Result, TransportKind, WorkerConfig};
use std::path::PathBuf;

/// Remote script execution worker.
///
/// Consumes compile, invoke and release requests from a message queue and
/// answers on the reply topic named by each request.
#[derive(Parser, Debug, Default)]
#[command(name = "script-executor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "SCRIPT_EXECUTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Topic to consume requests from
    #[arg(long)]
    pub request_topic: Option<String>,

    /// Message transport (nats, memory)
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Broker URL
    #[arg(long)]
    pub url: Option<String>,

    /// Log filter directive, e.g. `info` or `script_executor_server=debug`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format (text, json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Builds the effective configuration: file, then environment, then
    /// flags.
    ///
    /// # Errors
    ///
    /// Returns [`script_executor_core::Error::ConfigError`] if the file
    /// cannot be loaded, an override is invalid or validation fails.
    pub fn load_config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::load(path)?,
            None => WorkerConfig::default(),
        };
        config.apply_env()?;
        self.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Copies the flags that were given into `config`.
    pub fn apply_to(&self, config: &mut WorkerConfig) {
        if let Some(topic) = &self.request_topic {
            config.request_topic.clone_from(topic);
        }
        if let Some(transport) = self.transport {
            config.queue.transport = transport;
        }
        if let Some(url) = &self.url {
            config.queue.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}
