//! Script execution trait.

use crate::ScriptError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Compiles and runs untrusted scripts.
///
/// Implementations isolate scripts from the host process and enforce the
/// wall-clock budget passed to [`execute`](Self::execute). A script that
/// exceeds it must be interrupted and reported as
/// [`ScriptError::Timeout`], never as a runtime error.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use script_executor_core::ScriptError;
/// use script_executor_core::traits::ScriptExecutor;
/// use serde_json::Value;
/// use std::time::Duration;
///
/// /// Treats the body as a JSON literal.
/// struct LiteralExecutor;
///
/// #[async_trait]
/// impl ScriptExecutor for LiteralExecutor {
///     type Script = Value;
///
///     async fn compile(&self, body: &str) -> Result<Value, ScriptError> {
///         serde_json::from_str(body).map_err(|e| ScriptError::Compilation {
///             message: e.to_string(),
///             line: Some(e.line()),
///         })
///     }
///
///     async fn execute(
///         &self,
///         script: &Value,
///         _args: Vec<Value>,
///         _timeout: Duration,
///     ) -> Result<Value, ScriptError> {
///         Ok(script.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// The compiled unit, cheap to clone.
    type Script: Clone + Send + Sync + 'static;

    /// Compiles a script body.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Compilation`] if the body does not parse or
    /// uses constructs the sandbox forbids.
    async fn compile(&self, body: &str) -> Result<Self::Script, ScriptError>;

    /// Runs a compiled script with positional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Timeout`] if the script runs longer than
    /// `timeout`, and [`ScriptError::Runtime`] for any other failure.
    async fn execute(
        &self,
        script: &Self::Script,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, ScriptError>;
}
