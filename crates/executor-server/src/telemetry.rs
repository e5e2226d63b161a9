//! Periodic throughput and slow-request logging.
//!
//! Both loggers are driven by the request processor. Frequencies and
//! thresholds come from the `[script]` configuration section; a frequency
//! of zero turns the corresponding log line off.

use script_executor_core::ScriptConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counts invoke requests and emits a `STAT` line every
/// `stat_print_frequency` of them.
#[derive(Debug)]
pub struct InvokeTelemetry {
    stat_frequency: u64,
    trace_frequency: u64,
    invokes: AtomicU64,
    checkpoint: Mutex<Instant>,
}

/// What the processor should log for one invoke request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeTick {
    /// Sequence number of this invoke, starting at 1
    pub count: u64,
    /// Whether the script body should be traced
    pub trace_body: bool,
}

impl InvokeTelemetry {
    /// Creates the counter from configuration.
    #[must_use]
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            stat_frequency: config.stat_print_frequency,
            trace_frequency: config.script_body_trace_frequency,
            invokes: AtomicU64::new(0),
            checkpoint: Mutex::new(Instant::now()),
        }
    }

    /// Returns the number of invoke requests recorded so far.
    #[must_use]
    pub fn invokes(&self) -> u64 {
        self.invokes.load(Ordering::Relaxed)
    }

    /// Records one invoke request, logging the throughput line when due.
    #[must_use]
    pub fn record(&self) -> InvokeTick {
        let count = self.invokes.fetch_add(1, Ordering::Relaxed) + 1;

        if self.stat_frequency > 0 && count.is_multiple_of(self.stat_frequency) {
            let elapsed = {
                let mut checkpoint = self.checkpoint.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                let elapsed = now.duration_since(*checkpoint);
                *checkpoint = now;
                elapsed
            };
            tracing::info!(
                "STAT[{count}]: requests [{}], took [{}]ms, request/s [{:.2}]",
                self.stat_frequency,
                elapsed.as_millis(),
                requests_per_second(self.stat_frequency, elapsed)
            );
        }

        InvokeTick {
            count,
            trace_body: self.trace_frequency > 0 && count.is_multiple_of(self.trace_frequency),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn requests_per_second(requests: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        requests as f64 / secs
    } else {
        requests as f64
    }
}

/// Flags requests whose processing took longer than a threshold.
#[derive(Debug, Clone, Copy)]
pub struct SlowRequestLog {
    threshold: Duration,
    log_body: bool,
}

impl SlowRequestLog {
    /// Creates the logger from configuration.
    #[must_use]
    pub const fn new(config: &ScriptConfig) -> Self {
        Self {
            threshold: config.slow_query_threshold(),
            log_body: config.slow_query_log_body,
        }
    }

    /// Returns `true` if `elapsed` exceeds the threshold.
    #[must_use]
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.threshold
    }

    /// Logs a warning when `elapsed` exceeds the threshold and returns
    /// whether it did.
    ///
    /// `body` is only rendered when body logging is enabled.
    #[must_use]
    pub fn check(
        &self,
        request_id: &dyn std::fmt::Display,
        elapsed: Duration,
        function_name: Option<&str>,
        body: &[u8],
    ) -> bool {
        if !self.is_slow(elapsed) {
            return false;
        }

        let elapsed_ms = elapsed.as_millis();
        match function_name {
            Some(name) => tracing::warn!(
                "[{request_id}] SLOW PROCESSING [{elapsed_ms}ms] invoke function [{name}]"
            ),
            None => tracing::warn!("[{request_id}] SLOW PROCESSING [{elapsed_ms}ms]"),
        }
        if self.log_body {
            tracing::info!("Slow request body: {}", pretty_body(body));
        }
        true
    }
}

fn pretty_body(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
