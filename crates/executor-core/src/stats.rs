//! Statistics snapshots for the request processor.
//!
//! Counters are kept by the processor as atomics and captured into a
//! [`ProcessorStats`] snapshot on demand. Snapshots are serializable so
//! they can be logged as structured data.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::stats::{ProcessorStats, RequestCounters};
//!
//! let counters = RequestCounters {
//!     invoke_requests: 10,
//!     runtime_errors: 1,
//!     timeout_errors: 1,
//!     ..RequestCounters::default()
//! };
//! let stats = ProcessorStats::new(counters, 3, 1000);
//!
//! assert_eq!(stats.invoke_failure_rate(), Some(0.2));
//! assert!(stats.snapshot_time() <= chrono::Utc::now());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw request and outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    /// Compile requests received
    pub compile_requests: u64,
    /// Invoke requests received
    pub invoke_requests: u64,
    /// Release requests received
    pub release_requests: u64,
    /// Well-formed requests carrying no known request type
    pub unrecognized_requests: u64,
    /// Bodies that could not be decoded
    pub malformed_requests: u64,
    /// Failures answered with `COMPILATION_ERROR`
    pub compilation_errors: u64,
    /// Failures answered with `RUNTIME_ERROR`
    pub runtime_errors: u64,
    /// Failures answered with `TIMEOUT_ERROR`
    pub timeout_errors: u64,
    /// Compilations actually performed
    pub compilations: u64,
    /// Responses handed to the transport successfully
    pub responses_sent: u64,
    /// Responses the transport failed to accept
    pub publish_failures: u64,
    /// Requests that took longer than the slow-request threshold
    #[serde(default)]
    pub slow_requests: u64,
}

/// Point-in-time statistics of a request processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    snapshot_time: DateTime<Utc>,
    counters: RequestCounters,
    cache_size: usize,
    cache_capacity: usize,
}

impl ProcessorStats {
    /// Creates a snapshot stamped with the current time.
    #[must_use]
    pub fn new(counters: RequestCounters, cache_size: usize, cache_capacity: usize) -> Self {
        Self {
            snapshot_time: Utc::now(),
            counters,
            cache_size,
            cache_capacity,
        }
    }

    /// Returns when this snapshot was captured.
    #[must_use]
    pub const fn snapshot_time(&self) -> DateTime<Utc> {
        self.snapshot_time
    }

    /// Returns the raw counters.
    #[must_use]
    pub const fn counters(&self) -> &RequestCounters {
        &self.counters
    }

    /// Returns the number of cached scripts.
    #[must_use]
    pub const fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Returns the cache capacity.
    #[must_use]
    pub const fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Returns the total number of requests received, malformed included.
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        let c = &self.counters;
        c.compile_requests
            + c.invoke_requests
            + c.release_requests
            + c.unrecognized_requests
            + c.malformed_requests
    }

    /// Fraction of invoke requests that failed, or `None` before the first
    /// invoke.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn invoke_failure_rate(&self) -> Option<f64> {
        let c = &self.counters;
        if c.invoke_requests == 0 {
            return None;
        }
        let failures = (c.runtime_errors + c.timeout_errors).min(c.invoke_requests);
        Some(failures as f64 / c.invoke_requests as f64)
    }
}
