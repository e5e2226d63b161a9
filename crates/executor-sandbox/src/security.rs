//! Sandbox modes and resource limits for script execution.
//!
//! Both modes enforce the wall-clock budget and surface errors identically.
//! They differ in what the script language is allowed to do:
//!
//! - **Strict**: dangerous symbols are disabled at parse time, call depth
//!   and value sizes are bounded, `print`/`debug` are unavailable.
//! - **Relaxed**: the full standard library without size limits,
//!   `print`/`debug` output is forwarded to the log.
//!
//! # Examples
//!
//! ```
//! use script_executor_sandbox::security::{SandboxConfig, SandboxMode};
//!
//! let config = SandboxConfig::from_use_sandbox(true);
//! assert_eq!(config.mode(), SandboxMode::Strict);
//! assert!(config.disabled_symbols().contains(&"eval"));
//!
//! let relaxed = SandboxConfig::from_use_sandbox(false);
//! assert!(relaxed.disabled_symbols().is_empty());
//! ```

use std::time::Duration;

/// Symbols removed from the language in strict mode.
const STRICT_DISABLED_SYMBOLS: &[&str] = &[
    "eval", "import", "export", "print", "debug", "File", "file", "http", "net", "system",
    "process", "thread", "spawn",
];

/// How much of the script language is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SandboxMode {
    /// Restricted language with bounded resources (default).
    #[default]
    Strict,
    /// Full standard library, no size limits.
    Relaxed,
}

impl SandboxMode {
    /// Returns `true` for [`SandboxMode::Strict`].
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Engine limits and restrictions for one sandbox.
///
/// # Examples
///
/// ```
/// use script_executor_sandbox::security::{SandboxConfig, SandboxMode};
/// use std::time::Duration;
///
/// let config = SandboxConfig::builder()
///     .mode(SandboxMode::Strict)
///     .max_operations(1_000_000)
///     .max_call_levels(32)
///     .timeout_grace(Duration::from_millis(50))
///     .build();
///
/// assert_eq!(config.max_operations(), Some(1_000_000));
/// assert_eq!(config.max_call_levels(), Some(32));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    mode: SandboxMode,

    /// Operation budget per execution, `None` leaves only the wall clock
    max_operations: Option<u64>,

    /// Call depth limit, `None` keeps the engine's build-dependent default
    max_call_levels: Option<usize>,
    max_string_size: usize,
    max_array_size: usize,
    max_map_size: usize,

    /// Slack granted to the outer timer on top of the script budget
    timeout_grace: Duration,
}

impl SandboxConfig {
    /// Default maximum string length, in bytes.
    pub const DEFAULT_MAX_STRING_SIZE: usize = 1024 * 1024;

    /// Default maximum number of array elements.
    pub const DEFAULT_MAX_ARRAY_SIZE: usize = 100_000;

    /// Default maximum number of object map entries.
    pub const DEFAULT_MAX_MAP_SIZE: usize = 100_000;

    /// Default slack for the outer timer.
    pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_millis(100);

    /// Creates a new configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Creates the strict profile.
    ///
    /// No operation budget is set: runaway scripts are stopped by the
    /// wall-clock timeout, so they are reported as timeouts.
    #[must_use]
    pub fn strict() -> Self {
        Self::builder().mode(SandboxMode::Strict).build()
    }

    /// Creates the relaxed profile.
    #[must_use]
    pub fn relaxed() -> Self {
        Self::builder().mode(SandboxMode::Relaxed).build()
    }

    /// Maps the `use_sandbox` setting to a profile.
    #[must_use]
    pub fn from_use_sandbox(use_sandbox: bool) -> Self {
        if use_sandbox {
            Self::strict()
        } else {
            Self::relaxed()
        }
    }

    /// Returns the sandbox mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> SandboxMode {
        self.mode
    }

    /// Returns the operation budget per execution.
    #[inline]
    #[must_use]
    pub const fn max_operations(&self) -> Option<u64> {
        self.max_operations
    }

    /// Returns the configured maximum call depth.
    ///
    /// `None` keeps the engine default, which is lower in debug builds so
    /// deep recursion fails with an error before it exhausts the native
    /// stack of the executing thread.
    #[inline]
    #[must_use]
    pub const fn max_call_levels(&self) -> Option<usize> {
        self.max_call_levels
    }

    /// Returns the maximum string length.
    #[inline]
    #[must_use]
    pub const fn max_string_size(&self) -> usize {
        self.max_string_size
    }

    /// Returns the maximum array length.
    #[inline]
    #[must_use]
    pub const fn max_array_size(&self) -> usize {
        self.max_array_size
    }

    /// Returns the maximum object map size.
    #[inline]
    #[must_use]
    pub const fn max_map_size(&self) -> usize {
        self.max_map_size
    }

    /// Returns the slack granted to the outer timer.
    #[inline]
    #[must_use]
    pub const fn timeout_grace(&self) -> Duration {
        self.timeout_grace
    }

    /// Returns the symbols disabled at parse time.
    #[must_use]
    pub const fn disabled_symbols(&self) -> &'static [&'static str] {
        match self.mode {
            SandboxMode::Strict => STRICT_DISABLED_SYMBOLS,
            SandboxMode::Relaxed => &[],
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::strict()
    }
}

/// Builder for [`SandboxConfig`].
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    mode: Option<SandboxMode>,
    max_operations: Option<u64>,
    max_call_levels: Option<usize>,
    max_string_size: Option<usize>,
    max_array_size: Option<usize>,
    max_map_size: Option<usize>,
    timeout_grace: Option<Duration>,
}

impl SandboxConfigBuilder {
    /// Sets the sandbox mode.
    #[must_use]
    pub const fn mode(mut self, mode: SandboxMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets an operation budget per execution (strict mode only).
    #[must_use]
    pub const fn max_operations(mut self, ops: u64) -> Self {
        self.max_operations = Some(ops);
        self
    }

    /// Sets the maximum call depth (strict mode only).
    #[must_use]
    pub const fn max_call_levels(mut self, levels: usize) -> Self {
        self.max_call_levels = Some(levels);
        self
    }

    /// Sets the maximum string length (strict mode only).
    #[must_use]
    pub const fn max_string_size(mut self, size: usize) -> Self {
        self.max_string_size = Some(size);
        self
    }

    /// Sets the maximum array length (strict mode only).
    #[must_use]
    pub const fn max_array_size(mut self, size: usize) -> Self {
        self.max_array_size = Some(size);
        self
    }

    /// Sets the maximum object map size (strict mode only).
    #[must_use]
    pub const fn max_map_size(mut self, size: usize) -> Self {
        self.max_map_size = Some(size);
        self
    }

    /// Sets the slack granted to the outer timer.
    #[must_use]
    pub const fn timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = Some(grace);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SandboxConfig {
        SandboxConfig {
            mode: self.mode.unwrap_or_default(),
            max_operations: self.max_operations.filter(|ops| *ops > 0),
            max_call_levels: self.max_call_levels,
            max_string_size: self
                .max_string_size
                .unwrap_or(SandboxConfig::DEFAULT_MAX_STRING_SIZE),
            max_array_size: self
                .max_array_size
                .unwrap_or(SandboxConfig::DEFAULT_MAX_ARRAY_SIZE),
            max_map_size: self.max_map_size.unwrap_or(SandboxConfig::DEFAULT_MAX_MAP_SIZE),
            timeout_grace: self
                .timeout_grace
                .unwrap_or(SandboxConfig::DEFAULT_TIMEOUT_GRACE),
        }
    }
}
