//! Sandboxed script execution and compiled-script caching.
//!
//! Provides the Rhai-backed [`ScriptSandbox`], which implements
//! [`ScriptExecutor`](script_executor_core::traits::ScriptExecutor) with a
//! hard wall-clock timeout, and the FIFO [`ScriptCache`] that holds compiled
//! scripts between requests.

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod cache;
pub mod engine;
pub mod sandbox;
pub mod security;

pub use cache::ScriptCache;
pub use sandbox::{CompiledScript, SandboxStats, ScriptSandbox};
pub use security::{SandboxConfig, SandboxMode};
