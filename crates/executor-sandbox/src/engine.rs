//! Rhai engine construction and error translation.
//!
//! One engine, shared by all callers, parses script bodies. Every execution
//! gets a fresh engine wired to its own deadline, so no state leaks between
//! executions. Both engines share one copy of the standard library.

use crate::security::SandboxConfig;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Module, ParseError, Shared};
use script_executor_core::ScriptError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Loads the standard library once for sharing between engines.
pub fn standard_library() -> Shared<Module> {
    StandardPackage::new().as_shared_module()
}

/// Creates an engine with the mode's restrictions applied.
pub fn create_engine(config: &SandboxConfig, stdlib: &Shared<Module>) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(stdlib.clone());

    for &symbol in config.disabled_symbols() {
        engine.disable_symbol(symbol);
    }

    if config.mode().is_strict() {
        if let Some(ops) = config.max_operations() {
            engine.set_max_operations(ops);
        }
        if let Some(levels) = config.max_call_levels() {
            engine.set_max_call_levels(levels);
        }
        engine.set_max_string_size(config.max_string_size());
        engine.set_max_array_size(config.max_array_size());
        engine.set_max_map_size(config.max_map_size());
    } else {
        engine.on_print(|text| tracing::info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(target: "script", source = source.unwrap_or("<anonymous>"), %pos, "{text}");
        });
    }

    engine
}

/// Creates a per-execution engine that terminates the script at the next
/// operation once `timeout` has elapsed or `cancel` fires.
pub fn create_execution_engine(
    config: &SandboxConfig,
    stdlib: &Shared<Module>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Engine {
    let mut engine = create_engine(config, stdlib);
    let deadline = Instant::now() + timeout;
    engine.on_progress(move |_| {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });
    engine
}

/// Translates a parse failure.
pub fn compilation_error(err: &ParseError) -> ScriptError {
    ScriptError::Compilation {
        message: err.0.to_string(),
        line: err.1.line(),
    }
}

/// Translates an evaluation failure.
///
/// Termination by the progress hook is the timeout signal; everything else
/// is a runtime error classified by kind.
pub fn execution_error(err: EvalAltResult, timeout: Duration) -> ScriptError {
    if is_termination(&err) {
        return ScriptError::Timeout {
            timeout_ms: duration_ms(timeout),
        };
    }

    let mut err = err;
    let position = err.take_position();

    let name = match &err {
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorFunctionNotFound(..) => {
            "ReferenceError"
        }
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            "TypeError"
        }
        _ => "Error",
    };

    let message = match err {
        // `throw` values carry the message the script chose
        EvalAltResult::ErrorRuntime(value, _) => value
            .into_immutable_string()
            .map_or_else(|type_name| format!("thrown value of type {type_name}"), |s| s.to_string()),
        other => other.to_string(),
    };

    ScriptError::Runtime {
        name,
        message,
        line: position.line(),
    }
}

/// Termination raised inside a script function arrives wrapped in the
/// call error of every enclosing function.
fn is_termination(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_termination(inner),
        _ => false,
    }
}

/// Whole milliseconds of `duration`, saturating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SandboxConfig;

    fn strict_engine() -> Engine {
        create_engine(&SandboxConfig::strict(), &standard_library())
    }

    #[test]
    fn test_strict_engine_applies_limits() {
        let engine = strict_engine();
        assert_eq!(engine.max_call_levels(), Engine::new_raw().max_call_levels());
        assert_eq!(engine.max_array_size(), SandboxConfig::DEFAULT_MAX_ARRAY_SIZE);
        assert_eq!(engine.max_operations(), 0);
    }

    #[test]
    fn test_relaxed_engine_allows_print() {
        let engine = create_engine(&SandboxConfig::relaxed(), &standard_library());
        assert!(engine.compile(r#"print("hi")"#).is_ok());
    }

    #[test]
    fn test_parse_error_has_line() {
        let engine = strict_engine();
        let err = engine.compile("let x = 1;\nlet = ;").unwrap_err();
        let script_err = compilation_error(&err);
        assert!(script_err.is_compilation_error());
        assert_eq!(script_err.line(), Some(2));
        assert!(!script_err.message().contains("line"));
    }

    #[test]
    fn test_unknown_variable_is_reference_error() {
        let engine = strict_engine();
        let err = engine.eval::<Dynamic>("missing + 1").unwrap_err();
        let script_err = execution_error(*err, Duration::from_secs(1));
        assert_eq!(script_err.name(), "ReferenceError");
        assert_eq!(script_err.line(), Some(1));
    }

    #[test]
    fn test_thrown_string_keeps_message() {
        let engine = strict_engine();
        let err = engine.eval::<Dynamic>(r#"throw "boom""#).unwrap_err();
        let script_err = execution_error(*err, Duration::from_secs(1));
        assert_eq!(script_err.name(), "Error");
        assert_eq!(script_err.message(), "boom");
    }

    #[test]
    fn test_progress_hook_terminates() {
        let engine = create_execution_engine(
            &SandboxConfig::strict(),
            &standard_library(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        let err = engine.eval::<Dynamic>("loop {}").unwrap_err();
        let script_err = execution_error(*err, Duration::from_millis(20));
        assert_eq!(script_err, ScriptError::Timeout { timeout_ms: 20 });
    }

    #[test]
    fn test_termination_inside_function_is_timeout() {
        let engine = create_execution_engine(
            &SandboxConfig::strict(),
            &standard_library(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        let err = engine
            .eval::<Dynamic>("fn spin() { loop {} } fn outer() { spin() } outer()")
            .unwrap_err();
        assert!(execution_error(*err, Duration::from_millis(20)).is_timeout());
    }

    #[test]
    fn test_cancelled_run_stops_at_first_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = create_execution_engine(
            &SandboxConfig::relaxed(),
            &standard_library(),
            Duration::from_secs(60),
            cancel,
        );
        let started = Instant::now();
        let err = engine.eval::<Dynamic>("loop {}").unwrap_err();
        assert!(execution_error(*err, Duration::from_secs(60)).is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_configured_call_depth_is_applied() {
        let config = SandboxConfig::builder().max_call_levels(4).build();
        let engine = create_engine(&config, &standard_library());
        assert_eq!(engine.max_call_levels(), 4);
    }
}
