//! Logging infrastructure.
//!
//! This module provides:
//! - Per-run loggers with file + callback dual output
//! - Compact mode with progress filtering
//! - Tail buffer for diagnosing failed external commands
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```no_run
//! use tomoprep_core::logging::{RunLogger, LogConfig};
//!
//! let logger = RunLogger::new("scan_564", "/tmp/logs", LogConfig::default(), None).unwrap();
//!
//! logger.phase("Classify");
//! logger.info("5 dark, 5 flat, 200 projections");
//! logger.success("Classification complete");
//! ```

mod run_logger;
mod types;

pub use run_logger::{RunLogger, RunLoggerBuilder};
pub(crate) use run_logger::sanitize_filename;
pub use types::{LogCallback, LogConfig, LogLevel, MessagePrefix};

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`, falling back to `default_level`, and writes to
/// stderr. Should be called once at startup.
pub fn init_tracing(default_level: LogLevel) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(env_filter(default_level))
        .init();
}

/// Initialize tracing with an additional non-blocking file sink.
///
/// The returned guard must be held for the lifetime of the program;
/// dropping it flushes and stops the background writer.
pub fn init_tracing_with_file(
    default_level: LogLevel,
    log_dir: &Path,
    file_name: &str,
) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(env_filter(default_level))
        .init();

    guard
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn env_filter(default_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_strings() {
        assert_eq!(LogLevel::Debug.as_filter_str(), "debug");
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
    }

    #[test]
    fn test_tracing_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
        tracing::warn!("still fine");
    }
}
