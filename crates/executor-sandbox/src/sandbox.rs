//! Sandboxed script executor backed by the Rhai engine.
//!
//! Scripts are compiled once into a [`CompiledScript`] and can then be run
//! any number of times. Each run gets a fresh engine and scope: the only
//! input is the `args` array, the only output is the script's value.
//!
//! Runs happen on the blocking thread pool. The engine's progress hook
//! terminates the script at its first operation past the deadline. An outer
//! timer stops waiting shortly after the deadline; when it fires, or when
//! the caller stops waiting, the run is cancelled and stops at its next
//! operation.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::traits::ScriptExecutor;
//! use script_executor_sandbox::ScriptSandbox;
//! use script_executor_sandbox::security::SandboxConfig;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sandbox = ScriptSandbox::new(SandboxConfig::strict());
//! let script = sandbox.compile("args[0] * 2").await.unwrap();
//!
//! let result = sandbox
//!     .execute(&script, vec![json!(21)], Duration::from_secs(1))
//!     .await
//!     .unwrap();
//! assert_eq!(result, json!(42));
//! # }
//! ```

use crate::engine::{
    compilation_error, create_engine, create_execution_engine, duration_ms, execution_error,
    standard_library,
};
use crate::security::SandboxConfig;
use async_trait::async_trait;
use rhai::{AST, Dynamic, Engine, Module, Scope, Shared};
use script_executor_core::ScriptError;
use script_executor_core::traits::ScriptExecutor;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Name of the scope variable holding the invocation arguments.
pub const ARGS_VARIABLE: &str = "args";

/// A compiled script, cheap to clone.
#[derive(Clone)]
pub struct CompiledScript {
    ast: Arc<AST>,
    fingerprint: blake3::Hash,
    body_len: usize,
}

impl CompiledScript {
    /// Returns the BLAKE3 hash of the source, as hex.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.fingerprint.to_hex().to_string()
    }

    /// Returns the source length in bytes.
    #[must_use]
    pub const fn body_len(&self) -> usize {
        self.body_len
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("fingerprint", &self.fingerprint.to_hex().as_str())
            .field("body_len", &self.body_len)
            .finish_non_exhaustive()
    }
}

/// Counters describing sandbox activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxStats {
    /// Successful compilations
    pub compilations: u64,
    /// Rejected script bodies
    pub compilation_failures: u64,
    /// Executions started
    pub executions: u64,
    /// Executions that failed with a runtime error
    pub runtime_failures: u64,
    /// Executions interrupted at their deadline
    pub timeouts: u64,
    /// Runs still occupying a blocking thread
    pub active_runs: u64,
}

/// Script executor running untrusted scripts in a restricted engine.
pub struct ScriptSandbox {
    config: SandboxConfig,
    stdlib: Shared<Module>,
    compiler: Engine,

    compilations: AtomicU64,
    compilation_failures: AtomicU64,
    executions: AtomicU64,
    runtime_failures: AtomicU64,
    timeouts: AtomicU64,
    active_runs: Arc<AtomicU64>,
}

impl std::fmt::Debug for ScriptSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptSandbox")
            .field("config", &self.config)
            .field("stats", &self.collect_stats())
            .finish_non_exhaustive()
    }
}

impl ScriptSandbox {
    /// Creates a sandbox with the given limits.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        let stdlib = standard_library();
        let compiler = create_engine(&config, &stdlib);
        Self {
            config,
            stdlib,
            compiler,
            compilations: AtomicU64::new(0),
            compilation_failures: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            runtime_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            active_runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the sandbox configuration.
    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn collect_stats(&self) -> SandboxStats {
        SandboxStats {
            compilations: self.compilations.load(Ordering::Relaxed),
            compilation_failures: self.compilation_failures.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            runtime_failures: self.runtime_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            active_runs: self.active_runs.load(Ordering::Relaxed),
        }
    }

    /// Parses a script body.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Compilation`] if the body does not parse.
    pub fn compile_script(&self, body: &str) -> Result<CompiledScript, ScriptError> {
        match self.compiler.compile(body) {
            Ok(ast) => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                let script = CompiledScript {
                    ast: Arc::new(ast),
                    fingerprint: blake3::hash(body.as_bytes()),
                    body_len: body.len(),
                };
                tracing::debug!(fingerprint = %script.fingerprint(), "Script compiled");
                Ok(script)
            }
            Err(err) => {
                self.compilation_failures.fetch_add(1, Ordering::Relaxed);
                Err(compilation_error(&err))
            }
        }
    }

    fn record_failure(&self, err: &ScriptError) {
        if err.is_timeout() {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runtime_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Keeps a run counted as active until its blocking task returns.
struct ActiveRun(Arc<AtomicU64>);

impl ActiveRun {
    fn start(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Runs a script to completion on the current thread.
fn run_script(
    engine: &Engine,
    ast: &AST,
    args: Vec<Value>,
    timeout: Duration,
) -> Result<Value, ScriptError> {
    let args = rhai::serde::to_dynamic(args).map_err(|err| execution_error(*err, timeout))?;

    let mut scope = Scope::new();
    scope.push_dynamic(ARGS_VARIABLE, args);

    let result = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(|err| execution_error(*err, timeout))?;

    if result.is_unit() {
        return Ok(Value::Null);
    }
    rhai::serde::from_dynamic::<Value>(&result).map_err(|err| execution_error(*err, timeout))
}

#[async_trait]
impl ScriptExecutor for ScriptSandbox {
    type Script = CompiledScript;

    async fn compile(&self, body: &str) -> Result<CompiledScript, ScriptError> {
        self.compile_script(body)
    }

    async fn execute(
        &self,
        script: &CompiledScript,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, ScriptError> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        // Cancels the run when this future completes or is dropped.
        let cancel = CancellationToken::new();
        let _stop_run = cancel.clone().drop_guard();

        let engine = create_execution_engine(&self.config, &self.stdlib, timeout, cancel);
        let ast = Arc::clone(&script.ast);
        let active = ActiveRun::start(&self.active_runs);
        let task = tokio::task::spawn_blocking(move || {
            let _active = active;
            run_script(&engine, &ast, args, timeout)
        });

        let outcome = match tokio::time::timeout(timeout + self.config.timeout_grace(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ScriptError::Runtime {
                name: "Error",
                message: format!("script execution aborted: {join_err}"),
                line: None,
            }),
            Err(_) => {
                tracing::warn!(
                    fingerprint = %script.fingerprint(),
                    "Script did not stop at its deadline, cancelling the run"
                );
                Err(ScriptError::Timeout {
                    timeout_ms: duration_ms(timeout),
                })
            }
        };

        match &outcome {
            Ok(_) => tracing::debug!(elapsed_ms = duration_ms(started.elapsed()), "Script executed"),
            Err(err) => {
                self.record_failure(err);
                tracing::debug!(
                    elapsed_ms = duration_ms(started.elapsed()),
                    error = %err,
                    "Script execution failed"
                );
            }
        }
        outcome
    }
}
