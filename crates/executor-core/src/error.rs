//! Error types for the remote script executor.
//!
//! Two hierarchies live here:
//!
//! - [`Error`] covers infrastructure failures (configuration, message
//!   decoding, serialization, transport). Only startup failures of this kind
//!   terminate the worker.
//! - [`ScriptError`] covers failures of a script itself (compilation,
//!   runtime, timeout). These never escape the request processor; they are
//!   turned into failure responses.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::{Error, Result};
//!
//! fn parse_frequency(raw: &str) -> Result<u64> {
//!     raw.parse().map_err(|_| Error::ConfigError {
//!         message: format!("not a number: {raw}"),
//!     })
//! }
//!
//! let err = parse_frequency("often").unwrap_err();
//! assert!(err.is_config_error());
//! ```

use crate::protocol::{ErrorCode, error_details};
use thiserror::Error;

/// Main error type for the script executor infrastructure.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    ///
    /// Raised when configuration is invalid, missing required fields,
    /// or an override cannot be parsed.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },

    /// An incoming message could not be decoded.
    ///
    /// Covers malformed JSON bodies, missing or malformed headers and
    /// request envelopes carrying more than one request variant.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// Why the message was rejected
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Description of the serialization failure
        message: String,
        /// Underlying serde error
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Transport (message queue) failure.
    ///
    /// Raised when a topic cannot be provisioned, a message cannot be
    /// published, or the broker connection is lost.
    #[error("Transport error on '{topic}': {message}")]
    TransportError {
        /// Topic or subscription involved
        topic: String,
        /// Description of the failure
        message: String,
        /// Underlying transport error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Returns `true` if this is a configuration error.
    ///
    /// # Examples
    ///
    /// ```
    /// use script_executor_core::Error;
    ///
    /// let err = Error::ConfigError {
    ///     message: "max_active_scripts must be positive".to_string(),
    /// };
    /// assert!(err.is_config_error());
    /// ```
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }

    /// Returns `true` if this is a message decoding error.
    #[must_use]
    pub const fn is_invalid_message(&self) -> bool {
        matches!(self, Self::InvalidMessage { .. })
    }

    /// Returns `true` if this is a serialization error.
    #[must_use]
    pub const fn is_serialization_error(&self) -> bool {
        matches!(self, Self::SerializationError { .. })
    }

    /// Returns `true` if this is a transport error.
    ///
    /// # Examples
    ///
    /// ```
    /// use script_executor_core::Error;
    ///
    /// let err = Error::TransportError {
    ///     topic: "js_eval.requests".to_string(),
    ///     message: "connection refused".to_string(),
    ///     source: None,
    /// };
    /// assert!(err.is_transport_error());
    /// ```
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::TransportError { .. })
    }

    pub(crate) fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Result type alias for script executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a script during compilation or execution.
///
/// Every variant carries enough information to build the human-readable
/// `errorDetails` string returned over the wire: an error `name`, a
/// `message` and, when known, the source line the failure points at.
///
/// # Examples
///
/// ```
/// use script_executor_core::{ErrorCode, ScriptError};
///
/// let err = ScriptError::Timeout { timeout_ms: 100 };
/// assert_eq!(err.error_code(), ErrorCode::TimeoutError);
/// assert_eq!(err.details(), "Error: Script execution timed out after 100ms");
///
/// let err = ScriptError::Compilation {
///     message: "Expecting ';'".to_string(),
///     line: Some(3),
/// };
/// assert_eq!(err.details(), "SyntaxError: Expecting ';' in at line number 3");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The script body could not be compiled.
    #[error("SyntaxError: {message}")]
    Compilation {
        /// Parser message without position information
        message: String,
        /// 1-based source line, when known
        line: Option<usize>,
    },

    /// The script raised an error while running.
    #[error("{name}: {message}")]
    Runtime {
        /// Error class (`Error`, `TypeError`, `ReferenceError`, ...)
        name: &'static str,
        /// Error message without position information
        message: String,
        /// 1-based source line, when known
        line: Option<usize>,
    },

    /// The script exceeded its wall-clock budget and was interrupted.
    #[error("Error: Script execution timed out after {timeout_ms}ms")]
    Timeout {
        /// The budget that was exceeded
        timeout_ms: u64,
    },
}

impl ScriptError {
    /// Creates a compilation error for an invoke request that missed the
    /// cache and carried no script body to compile.
    #[must_use]
    pub fn missing_body() -> Self {
        Self::Compilation {
            message: "script body is required to compile an uncached script".to_string(),
            line: None,
        }
    }

    /// Returns the error class name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Compilation { .. } => "SyntaxError",
            Self::Runtime { name, .. } => *name,
            Self::Timeout { .. } => "Error",
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Compilation { message, .. } | Self::Runtime { message, .. } => message.clone(),
            Self::Timeout { timeout_ms } => {
                format!("Script execution timed out after {timeout_ms}ms")
            }
        }
    }

    /// Returns the source line the error points at, when known.
    #[must_use]
    pub const fn line(&self) -> Option<usize> {
        match self {
            Self::Compilation { line, .. } | Self::Runtime { line, .. } => *line,
            Self::Timeout { .. } => None,
        }
    }

    /// Returns a stack-like location trace, whose first line has the form
    /// `<anonymous>:<line>`.
    #[must_use]
    pub fn stack(&self) -> Option<String> {
        self.line().map(|line| format!("<anonymous>:{line}"))
    }

    /// Maps this failure to its protocol error code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Compilation { .. } => ErrorCode::CompilationError,
            Self::Runtime { .. } => ErrorCode::RuntimeError,
            Self::Timeout { .. } => ErrorCode::TimeoutError,
        }
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a compilation failure.
    #[must_use]
    pub const fn is_compilation_error(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }

    /// Builds the `errorDetails` string sent back to the caller.
    #[must_use]
    pub fn details(&self) -> String {
        error_details(self.name(), &self.message(), self.stack().as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_detection() {
        let err = Error::ConfigError {
            message: "Invalid configuration".to_string(),
        };
        assert!(err.is_config_error());
        assert!(!err.is_transport_error());
    }

    #[test]
    fn test_invalid_message_detection() {
        let err = Error::invalid_message("missing requestId header");
        assert!(err.is_invalid_message());
        assert!(format!("{err}").contains("missing requestId header"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = serde_err.into();
        assert!(err.is_serialization_error());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_script_error_names() {
        let compile = ScriptError::Compilation {
            message: "bad".to_string(),
            line: None,
        };
        let runtime = ScriptError::Runtime {
            name: "TypeError",
            message: "bad".to_string(),
            line: Some(1),
        };
        let timeout = ScriptError::Timeout { timeout_ms: 5 };

        assert_eq!(compile.name(), "SyntaxError");
        assert_eq!(runtime.name(), "TypeError");
        assert_eq!(timeout.name(), "Error");
    }

    #[test]
    fn test_script_error_codes() {
        assert_eq!(
            ScriptError::missing_body().error_code(),
            ErrorCode::CompilationError
        );
        assert_eq!(
            ScriptError::Runtime {
                name: "Error",
                message: "boom".to_string(),
                line: None,
            }
            .error_code(),
            ErrorCode::RuntimeError
        );
        assert!(ScriptError::Timeout { timeout_ms: 1 }.is_timeout());
    }

    #[test]
    fn test_runtime_details_with_line() {
        let err = ScriptError::Runtime {
            name: "ReferenceError",
            message: "Variable not found: foo".to_string(),
            line: Some(2),
        };
        assert_eq!(err.stack().as_deref(), Some("<anonymous>:2"));
        assert_eq!(
            err.details(),
            "ReferenceError: Variable not found: foo in at line number 2"
        );
    }

    #[test]
    fn test_display_matches_details_without_line() {
        let err = ScriptError::Runtime {
            name: "Error",
            message: "boom".to_string(),
            line: None,
        };
        assert_eq!(err.to_string(), err.details());
    }
}
