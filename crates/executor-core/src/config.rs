//! Worker configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variable overrides. The server binary applies its
//! command-line flags last.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::{TransportKind, WorkerConfig};
//!
//! let config = WorkerConfig::from_toml_str(
//!     r#"
//!     request_topic = "scripts.in"
//!
//!     [script]
//!     max_active_scripts = 16
//!
//!     [queue]
//!     transport = "memory"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.request_topic, "scripts.in");
//! assert_eq!(config.script.max_active_scripts, 16);
//! assert_eq!(config.script.default_timeout_ms, 5000);
//! assert_eq!(config.queue.transport, TransportKind::Memory);
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Complete configuration of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Topic (and subscription) the worker consumes requests from.
    ///
    /// Default: `js_eval.requests`
    pub request_topic: String,

    /// Script execution and telemetry settings
    pub script: ScriptConfig,

    /// Message transport settings
    pub queue: QueueConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_topic: "js_eval.requests".to_string(),
            script: ScriptConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Script execution, caching and telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Emit a throughput line every N invokes, `0` disables it.
    ///
    /// Default: 10000
    pub stat_print_frequency: u64,

    /// Log the script body every N invokes, `0` disables it.
    ///
    /// Default: 10000
    pub script_body_trace_frequency: u64,

    /// Run scripts in the strict sandbox (`true`) or the relaxed engine.
    ///
    /// Default: true
    pub use_sandbox: bool,

    /// Upper bound on cached compiled scripts.
    ///
    /// Default: 1000
    pub max_active_scripts: usize,

    /// Requests slower than this are logged as warnings.
    ///
    /// Default: 5000
    pub slow_query_log_ms: u64,

    /// Also log the pretty-printed body of slow requests.
    ///
    /// Default: false
    pub slow_query_log_body: bool,

    /// Budget applied to invoke requests that carry no timeout.
    ///
    /// Default: 5000
    pub default_timeout_ms: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            stat_print_frequency: 10_000,
            script_body_trace_frequency: 10_000,
            use_sandbox: true,
            max_active_scripts: 1000,
            slow_query_log_ms: 5000,
            slow_query_log_body: false,
            default_timeout_ms: 5000,
        }
    }
}

impl ScriptConfig {
    /// Returns the slow request threshold.
    #[must_use]
    pub const fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_log_ms)
    }

    /// Returns the default execution budget.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Which message transport the worker connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// NATS broker
    #[default]
    Nats,
    /// In-process broker, for tests and loopback runs
    Memory,
}

impl TransportKind {
    /// Returns the configuration name of the transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nats => "nats",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nats" => Ok(Self::Nats),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(Error::ConfigError {
                message: format!("unknown transport '{other}', expected 'nats' or 'memory'"),
            }),
        }
    }
}

/// Message transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Transport implementation.
    ///
    /// Default: `nats`
    pub transport: TransportKind,

    /// Broker URL, required for NATS.
    ///
    /// Default: `nats://127.0.0.1:4222`
    pub url: String,

    /// Project identifier. For NATS a non-empty value prefixes every
    /// subject as `<project_id>.<topic>`.
    pub project_id: String,

    /// Topic and subscription properties as `key:value;key:value`.
    ///
    /// Default: `ackDeadlineInSec:30;messageRetentionInSec:604800`
    pub queue_properties: String,

    /// Upper bound on closing the transport at shutdown.
    ///
    /// Default: 5000
    pub close_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            url: "nats://127.0.0.1:4222".to_string(),
            project_id: String::new(),
            queue_properties: "ackDeadlineInSec:30;messageRetentionInSec:604800".to_string(),
            close_timeout_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Returns the shutdown bound for closing the transport.
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::ConfigError {
                message: format!("unknown log format '{other}', expected 'text' or 'json'"),
            }),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    ///
    /// Default: `info`
    pub level: String,

    /// Output format.
    ///
    /// Default: `text`
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl WorkerConfig {
    /// Parses configuration from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the text is not valid TOML or a
    /// value has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigError {
            message: format!("failed to parse configuration: {e}"),
        })
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if an override cannot be parsed.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if an override cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use script_executor_core::WorkerConfig;
    ///
    /// let mut config = WorkerConfig::default();
    /// config
    ///     .apply_env_overrides(|name| match name {
    ///         "SCRIPT_MAX_ACTIVE_SCRIPTS" => Some("5".to_string()),
    ///         "SCRIPT_USE_SANDBOX" => Some("false".to_string()),
    ///         _ => None,
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(config.script.max_active_scripts, 5);
    /// assert!(!config.script.use_sandbox);
    /// ```
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("REMOTE_JS_EVAL_REQUEST_TOPIC") {
            self.request_topic = v;
        }
        if let Some(v) = var("SCRIPT_STAT_PRINT_FREQUENCY") {
            self.script.stat_print_frequency = parse_env("SCRIPT_STAT_PRINT_FREQUENCY", &v)?;
        }
        if let Some(v) = var("SCRIPT_BODY_TRACE_FREQUENCY") {
            self.script.script_body_trace_frequency = parse_env("SCRIPT_BODY_TRACE_FREQUENCY", &v)?;
        }
        if let Some(v) = var("SCRIPT_USE_SANDBOX") {
            self.script.use_sandbox = parse_bool("SCRIPT_USE_SANDBOX", &v)?;
        }
        if let Some(v) = var("SCRIPT_MAX_ACTIVE_SCRIPTS") {
            self.script.max_active_scripts = parse_env("SCRIPT_MAX_ACTIVE_SCRIPTS", &v)?;
        }
        if let Some(v) = var("SLOW_QUERY_LOG_MS") {
            self.script.slow_query_log_ms = parse_env("SLOW_QUERY_LOG_MS", &v)?;
        }
        if let Some(v) = var("SLOW_QUERY_LOG_BODY") {
            self.script.slow_query_log_body = parse_bool("SLOW_QUERY_LOG_BODY", &v)?;
        }
        if let Some(v) = var("SCRIPT_DEFAULT_TIMEOUT_MS") {
            self.script.default_timeout_ms = parse_env("SCRIPT_DEFAULT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("TB_QUEUE_TYPE") {
            self.queue.transport = v.parse()?;
        }
        if let Some(v) = var("TB_QUEUE_URL") {
            self.queue.url = v;
        }
        if let Some(v) = var("TB_QUEUE_PROJECT_ID") {
            self.queue.project_id = v;
        }
        if let Some(v) = var("TB_QUEUE_PROPERTIES") {
            self.queue.queue_properties = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if:
    /// - `request_topic` is empty
    /// - `script.max_active_scripts` is zero
    /// - `script.default_timeout_ms` is zero
    /// - the NATS transport is selected without a URL
    ///
    /// # Examples
    ///
    /// ```
    /// use script_executor_core::WorkerConfig;
    ///
    /// assert!(WorkerConfig::default().validate().is_ok());
    ///
    /// let mut invalid = WorkerConfig::default();
    /// invalid.script.max_active_scripts = 0;
    /// assert!(invalid.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| {
            Err(Error::ConfigError {
                message: message.to_string(),
            })
        };

        if self.request_topic.trim().is_empty() {
            return fail("request_topic must not be empty");
        }
        if self.script.max_active_scripts == 0 {
            return fail("script.max_active_scripts must be greater than zero");
        }
        if self.script.default_timeout_ms == 0 {
            return fail("script.default_timeout_ms must be greater than zero");
        }
        if self.queue.transport == TransportKind::Nats && self.queue.url.trim().is_empty() {
            return fail("queue.url is required for the nats transport");
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| Error::ConfigError {
        message: format!("invalid value '{value}' for {name}: {e}"),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::ConfigError {
            message: format!("invalid boolean '{value}' for {name}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.request_topic, "js_eval.requests");
        assert_eq!(config.script.stat_print_frequency, 10_000);
        assert!(config.script.use_sandbox);
        assert_eq!(config.script.max_active_scripts, 1000);
        assert_eq!(config.queue.transport, TransportKind::Nats);
        assert_eq!(config.queue.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(WorkerConfig::from_toml_str("").unwrap(), WorkerConfig::default());
    }

    #[test]
    fn test_toml_type_error() {
        let err = WorkerConfig::from_toml_str("[script]\nmax_active_scripts = \"many\"").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = WorkerConfig::default();
        config
            .apply_env_overrides(lookup(&[
                ("REMOTE_JS_EVAL_REQUEST_TOPIC", "custom.requests"),
                ("SCRIPT_STAT_PRINT_FREQUENCY", "7"),
                ("SLOW_QUERY_LOG_BODY", "true"),
                ("TB_QUEUE_TYPE", "memory"),
                ("LOG_FORMAT", "json"),
                ("TB_QUEUE_URL", ""),
            ]))
            .unwrap();
        assert_eq!(config.request_topic, "custom.requests");
        assert_eq!(config.script.stat_print_frequency, 7);
        assert!(config.script.slow_query_log_body);
        assert_eq!(config.queue.transport, TransportKind::Memory);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.queue.url, "nats://127.0.0.1:4222");
    }

    #[test]
    fn test_env_override_parse_failure() {
        let mut config = WorkerConfig::default();
        let err = config
            .apply_env_overrides(lookup(&[("SCRIPT_MAX_ACTIVE_SCRIPTS", "lots")]))
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("SCRIPT_MAX_ACTIVE_SCRIPTS"));

        let err = config
            .apply_env_overrides(lookup(&[("SCRIPT_USE_SANDBOX", "maybe")]))
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WorkerConfig::default();
        config.script.default_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.request_topic = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.queue.url.clear();
        assert!(config.validate().is_err());
        config.queue.transport = TransportKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("NATS".parse::<TransportKind>().unwrap(), TransportKind::Nats);
        assert_eq!("in-memory".parse::<TransportKind>().unwrap(), TransportKind::Memory);
        assert!("kafka".parse::<TransportKind>().is_err());
    }
}
