#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The `Logger` capability consumed by the scheduler core.
//!
//! The core never depends on a concrete logging backend: it only calls
//! [`Logger::log`] (or one of its level-named helpers) on whatever capability
//! the façade was built with. [`TracingLogger`] is the production
//! implementation, backed by the `tracing` ecosystem.

use std::{
    path::Path,
    sync::Mutex,
};

/// Severity of a log message, per spec §6 "Logger (consumed capability)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail (enqueue/dequeue events).
    Debug,
    /// Routine lifecycle events (start/stop, task assignment).
    Info,
    /// Recoverable, noteworthy conditions (join timeout, unreadable source).
    Warning,
    /// Conditions surfaced to the caller (allocation/submission failure).
    Error,
}

/// A log sink the core can call into without knowing its backend.
pub trait Logger: Send + Sync {
    /// Emits a single message at the given level.
    fn log(&self, level: LogLevel, message: &str);

    /// Convenience wrapper for [`LogLevel::Debug`].
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Convenience wrapper for [`LogLevel::Info`].
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Convenience wrapper for [`LogLevel::Warning`].
    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    /// Convenience wrapper for [`LogLevel::Error`].
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards every message to the `tracing` ecosystem at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Discards every message. Used where a `Logger` is required but observing
/// its output is not part of the test.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Captures every message in-memory, for tests that assert on what was
/// logged (e.g. a join timeout warning).
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    /// Creates an empty recording logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every message logged so far.
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().expect("recording logger mutex poisoned").clone()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .expect("recording logger mutex poisoned")
            .push((level, message.to_string()));
    }
}

/// Errors that can occur while installing the process-wide tracing
/// subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The configured log file could not be opened for appending.
    #[error("failed to open log file '{path}': {source}")]
    OpenLogFile {
        /// The path that failed to open.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Installs a process-wide `tracing` subscriber.
///
/// When `log_file_path` is `Some`, log lines are appended to that file in
/// addition to the default formatted output; `detailed` raises the maximum
/// level from `INFO` to `DEBUG` (spec §6 `enable_detailed_logging`).
///
/// Intended to be called once, near the start of `main`. Not part of the
/// core: the core only ever depends on the [`Logger`] trait above.
pub fn install_subscriber(log_file_path: Option<&Path>, detailed: bool) -> Result<(), LoggingError> {
    let level = if detailed {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    match log_file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenLogFile {
                    path: path.display().to_string(),
                    source,
                })?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recording_logger_captures_messages() {
        let logger = RecordingLogger::new();
        logger.warning("join timed out");
        logger.error("allocation failed");

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (LogLevel::Warning, "join timed out".to_string()));
        assert_eq!(entries[1], (LogLevel::Error, "allocation failed".to_string()));
    }

    #[test]
    fn null_logger_does_not_panic() {
        let logger = NullLogger;
        logger.debug("ignored");
        logger.info("ignored");
    }
}
