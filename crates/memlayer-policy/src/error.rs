//! Error taxonomy and the pluggable reporting callback.
//!
//! The allocation engine never unwinds. A failure is converted into a
//! [`MemoryError`], reported once through a [`Reporter`], and the operation
//! returns `None`. Whether anything is printed, and whether the process
//! survives, is decided by the [`ErrorPolicy`] and the installed
//! [`ErrorHandler`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{LogEmitter, LogEntry, LogLevel};

/// Severity passed to the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Error,
    Warning,
    /// Internal invariant violated. The handler is expected to terminate.
    Assertion,
    /// Explicit crash request. The handler is expected to terminate.
    Fatal,
}

impl ErrorSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Assertion => "ASSERTION",
            Self::Fatal => "FATAL",
        }
    }

    /// Returns true for severities after which the process should not continue.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Assertion | Self::Fatal)
    }

    #[must_use]
    pub const fn log_level(self) -> LogLevel {
        match self {
            Self::Warning => LogLevel::Warn,
            Self::Error => LogLevel::Error,
            Self::Assertion | Self::Fatal => LogLevel::Fatal,
        }
    }
}

/// Callback signature: `(severity, function, file, line, message)`.
pub type ErrorHandler = fn(ErrorSeverity, &str, &str, u32, &str);

static ERROR_HANDLER: RwLock<Option<ErrorHandler>> = parking_lot::const_rwlock(None);

/// Install a process-wide error handler. `None` restores the default.
pub fn set_error_handler(handler: Option<ErrorHandler>) {
    *ERROR_HANDLER.write() = handler;
}

/// The currently installed process-wide error handler.
#[must_use]
pub fn error_handler() -> ErrorHandler {
    ERROR_HANDLER.read().unwrap_or(default_error_handler)
}

/// Writes one JSONL line to stderr; aborts on `Assertion` and `Fatal`.
pub fn default_error_handler(
    severity: ErrorSeverity,
    function: &str,
    file: &str,
    line: u32,
    message: &str,
) {
    let entry = LogEntry::new(severity.log_level(), "memory.report")
        .with_location(function, file, line)
        .with_message(format!("[{}] {message}", severity.as_str()));
    let mut emitter = LogEmitter::stderr();
    // stderr is the last resort; nothing useful to do if it fails.
    let _ = emitter.emit_entry(&entry);
    let _ = emitter.flush();
    if severity.is_terminal() {
        std::process::abort();
    }
}

/// Report a fatal error through the process-wide handler and abort if it returns.
#[track_caller]
pub fn crash(message: &str) -> ! {
    let loc = std::panic::Location::caller();
    error_handler()(ErrorSeverity::Fatal, "crash", loc.file(), loc.line(), message);
    std::process::abort()
}

/// Where a report or tracked allocation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

impl SourceLocation {
    #[must_use]
    pub const fn new(file: &'static str, line: u32, function: &'static str) -> Self {
        Self {
            file,
            line,
            function,
        }
    }

    /// Location of the `#[track_caller]` chain's outermost caller.
    #[track_caller]
    #[must_use]
    pub fn caller(function: &'static str) -> Self {
        let loc = std::panic::Location::caller();
        Self::new(loc.file(), loc.line(), function)
    }
}

/// Capture the current source location, using the module path as function.
#[macro_export]
macro_rules! here {
    () => {
        $crate::SourceLocation::new(file!(), line!(), module_path!())
    };
    ($function:expr) => {
        $crate::SourceLocation::new(file!(), line!(), $function)
    };
}

/// Failures the allocation layer can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("allocation size overflow: {count} elements of {element_size} bytes")]
    SizeOverflow { count: usize, element_size: usize },
    #[error("null pointer passed to {operation}")]
    NullPointer { operation: &'static str },
    #[error("index {index} out of bounds for length {len}")]
    InvalidIndex { index: usize, len: usize },
    #[error("invalid alignment {alignment}: must be a power of two no larger than {max}")]
    InvalidAlignment { alignment: usize, max: usize },
    #[error("memory limit exceeded: {requested} bytes requested, {usage} in use, limit {limit}")]
    LimitExceeded { requested: u64, usage: u64, limit: u64 },
    #[error("double free or foreign pointer {address:#x}")]
    DoubleFree { address: usize },
    #[error("header of block {address:#x} records {found} bytes, tracker recorded {expected}")]
    HeaderCorrupted {
        address: usize,
        found: u64,
        expected: u64,
    },
    #[error("element construction failed: {0}")]
    Construction(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl MemoryError {
    /// Severity before error-policy escalation.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Assertion(_) => ErrorSeverity::Assertion,
            Self::InvalidAlignment { .. } if cfg!(debug_assertions) => ErrorSeverity::Assertion,
            Self::Fatal(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}

/// How failures are surfaced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Nothing is reported; failures are visible only as `None` results.
    Silent,
    /// Reported, but assertions are delivered as plain errors.
    LogOnly,
    /// Errors escalate to assertions in debug builds.
    #[default]
    AssertDebug,
    /// Every error escalates to an assertion.
    AssertAlways,
}

impl ErrorPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "silent" | "off" | "none" => Self::Silent,
            "log" | "log_only" | "log-only" => Self::LogOnly,
            "assert" | "assert_always" | "assert-always" | "strict" => Self::AssertAlways,
            _ => Self::AssertDebug,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::LogOnly => "log_only",
            Self::AssertDebug => "assert_debug",
            Self::AssertAlways => "assert_always",
        }
    }

    /// Severity actually delivered to the handler, or `None` if suppressed.
    #[must_use]
    pub const fn escalate(self, severity: ErrorSeverity) -> Option<ErrorSeverity> {
        match (self, severity) {
            (Self::Silent, _) => None,
            (_, ErrorSeverity::Warning | ErrorSeverity::Fatal) => Some(severity),
            (Self::LogOnly, _) => Some(ErrorSeverity::Error),
            (Self::AssertDebug, ErrorSeverity::Error) if cfg!(debug_assertions) => {
                Some(ErrorSeverity::Assertion)
            }
            (Self::AssertAlways, _) => Some(ErrorSeverity::Assertion),
            (_, severity) => Some(severity),
        }
    }
}

/// Error policy plus an optional handler override, owned by each engine.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    policy: ErrorPolicy,
    handler: Option<ErrorHandler>,
}

impl Reporter {
    /// Reporter delivering to the process-wide handler.
    #[must_use]
    pub const fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            handler: None,
        }
    }

    /// Deliver to `handler` instead of the process-wide handler.
    #[must_use]
    pub const fn with_handler(mut self, handler: ErrorHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub const fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    #[must_use]
    pub fn handler(&self) -> ErrorHandler {
        self.handler.unwrap_or_else(error_handler)
    }

    /// Report a message at `severity`, subject to the error policy.
    pub fn report(&self, severity: ErrorSeverity, loc: &SourceLocation, message: &str) {
        if let Some(severity) = self.policy.escalate(severity) {
            (self.handler())(severity, loc.function, loc.file, loc.line, message);
        }
    }

    /// Report a [`MemoryError`] at its natural severity.
    pub fn report_error(&self, error: &MemoryError, loc: &SourceLocation) {
        if self.policy == ErrorPolicy::Silent {
            return;
        }
        self.report(error.severity(), loc, &error.to_string());
    }
}
