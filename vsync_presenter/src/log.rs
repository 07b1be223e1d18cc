//! Internal logging system for the vsync presenter
//!
//! This module provides a pluggable logging layer with:
//! - Customizable logger via Logger trait
//! - Severity levels (Trace, Debug, Info, Warn, Error)
//! - Colored console output by default
//! - File and line information for detailed ERROR logs
//!
//! The retrace handler never logs: it runs in interrupt context. Everything
//! it observes is reported later from the main loop.

use colored::*;
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Logger trait for custom logging implementations
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::vsync::log::{Logger, LogEntry};
///
/// struct FileLogger {
///     file: std::fs::File,
/// }
///
/// impl Logger for FileLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Write to file...
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Log an entry
    fn log(&self, entry: &LogEntry);
}

/// Log entry containing all information about a log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity level
    pub severity: LogSeverity,

    /// Timestamp when the log was created
    pub timestamp: SystemTime,

    /// Source module (e.g., "vsync::FramePresenter", "vsync::console")
    pub source: String,

    /// Log message
    pub message: String,

    /// Source file (only for detailed ERROR logs)
    pub file: Option<&'static str>,

    /// Source line (only for detailed ERROR logs)
    pub line: Option<u32>,
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Per-retrace chatter
    Trace,

    /// Per-frame information (drops, held frames)
    Debug,

    /// Mode switches, missed vblanks, lifecycle
    Info,

    /// Driver health and clamped configuration
    Warn,

    /// Failures, with file:line details
    Error,
}

/// Default logger: coloured console output
///
/// `[timestamp] [SEVERITY] [source] message`, with `(file:line)` appended
/// to detailed entries. Entries below `min_severity` are discarded; warnings
/// and errors go to stderr so they survive a redirected stdout.
#[derive(Debug, Clone, Copy)]
pub struct DefaultLogger {
    pub min_severity: LogSeverity,
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self { min_severity: LogSeverity::Debug }
    }
}

impl DefaultLogger {
    pub fn new(min_severity: LogSeverity) -> Self {
        Self { min_severity }
    }

    pub fn enabled(&self, severity: LogSeverity) -> bool {
        severity >= self.min_severity
    }

    fn label(severity: LogSeverity) -> ColoredString {
        match severity {
            LogSeverity::Trace => "TRACE".bright_black(),
            LogSeverity::Debug => "DEBUG".cyan(),
            LogSeverity::Info => "INFO ".green(),
            LogSeverity::Warn => "WARN ".yellow(),
            LogSeverity::Error => "ERROR".red().bold(),
        }
    }

    /// One formatted output line
    pub fn render(entry: &LogEntry) -> String {
        let datetime: DateTime<Local> = entry.timestamp.into();
        let mut line = format!("[{}] [{}] [{}] {}",
            datetime.format("%H:%M:%S%.3f"),
            Self::label(entry.severity),
            entry.source.bright_blue(),
            entry.message);
        if let (Some(file), Some(number)) = (entry.file, entry.line) {
            line.push_str(&format!(" ({}:{})", file, number));
        }
        line
    }
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        if !self.enabled(entry.severity) {
            return;
        }
        let line = Self::render(entry);
        if entry.severity >= LogSeverity::Warn {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message (very verbose, typically disabled)
#[macro_export]
macro_rules! present_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::vsync::Engine::log(
            $crate::vsync::log::LogSeverity::Trace,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a DEBUG message
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::present_debug;
///
/// let frame = 42;
/// present_debug!("vsync::FramePresenter", "Frame {} dropped", frame);
/// ```
#[macro_export]
macro_rules! present_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::vsync::Engine::log(
            $crate::vsync::log::LogSeverity::Debug,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an INFO message
#[macro_export]
macro_rules! present_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::vsync::Engine::log(
            $crate::vsync::log::LogSeverity::Info,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a WARN message
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::present_warn;
///
/// let n = 30;
/// present_warn!("vsync::RetraceSignal", "Flip forced after {} intervals", n);
/// ```
#[macro_export]
macro_rules! present_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::vsync::Engine::log(
            $crate::vsync::log::LogSeverity::Warn,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an ERROR message with file:line information
#[macro_export]
macro_rules! present_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::vsync::Engine::log_detailed(
            $crate::vsync::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            file!(),
            line!()
        )
    };
}

/// Log an ERROR message and evaluate to `Error::BackendError` with the same text
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::present_err;
/// use vsync_presenter::vsync::Error;
///
/// let id = 3;
/// let err: Error = present_err!("vsync::console", "Framebuffer {} not registered", id);
/// assert!(matches!(err, Error::BackendError(_)));
/// ```
#[macro_export]
macro_rules! present_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::vsync::Engine::log_detailed(
            $crate::vsync::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!()
        );
        $crate::vsync::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return `Err(Error::BackendError)` from the enclosing function
#[macro_export]
macro_rules! present_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::present_err!($source, $($arg)*))
    };
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
