//! Logger handle injected into plugin constructors

use std::fmt;
use std::sync::Arc;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very verbose diagnostics
    Trace,
    /// Diagnostics
    Debug,
    /// Normal operation
    Info,
    /// Something unexpected but recoverable
    Warn,
    /// Failure
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(level)
    }
}

/// Destination for log records, implemented by the host
pub trait LogSink: Send + Sync + fmt::Debug {
    /// Write a record
    fn log(&self, category: &str, level: LogLevel, message: &str);

    /// Whether records at `level` would be written at all
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}

/// Logger bound to a single plugin type
///
/// The category is the fully qualified name of the type the logger was
/// created for, so every record can be attributed to the plugin that wrote it.
#[derive(Clone)]
pub struct Logger {
    category: String,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .finish()
    }
}

impl Logger {
    /// Create a logger for `category` writing to `sink`
    pub fn new(category: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            category: category.into(),
            sink,
        }
    }

    /// Type name this logger is bound to
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Write a record at `level`
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if self.sink.enabled(level) {
            self.sink.log(&self.category, level, &message.to_string());
        }
    }

    /// Write a trace record
    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    /// Write a debug record
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Write an info record
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Write a warning record
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Write an error record
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}
