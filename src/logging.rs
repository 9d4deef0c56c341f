//! Logging module for vidpace.
//!
//! This module configures tracing with JSON output to a rotating log file
//! under the user's local data directory, and human-readable output to
//! stderr.

use crate::error::LoggingError;
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::UtcTime, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Application directory under the local data directory
const LOG_DIR: &str = "vidpace";
/// Log file prefix
const LOG_FILE_PREFIX: &str = "vidpace";
/// Maximum number of log files to retain
const MAX_LOG_FILES: usize = 3;

/// Initialize the logging system with both stderr and file output.
///
/// `level_override` replaces `RUST_LOG` when given. The returned guard must
/// be held for the lifetime of the application.
pub fn init_logging(level_override: Option<&str>) -> Result<LogGuard, LoggingError> {
    let env_filter = build_filter(level_override)?;

    let log_dir = log_directory()?;
    std::fs::create_dir_all(&log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.display().to_string(),
        source: e,
    })?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&log_dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let stderr_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(non_blocking_stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer(non_blocking_file))
        .with(stderr_layer)
        .try_init()
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

/// Filter from the override, else `RUST_LOG`, else `info`.
fn build_filter(level_override: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match level_override {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|_| LoggingError::InvalidFilter(directives.to_string())),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// JSON layer used for the log file.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_current_span(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
}

/// `<local data dir>/vidpace`
fn log_directory() -> Result<PathBuf, LoggingError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(LOG_DIR))
        .ok_or(LoggingError::DataDirectoryNotFound)
}

/// Guard that keeps the non-blocking writers alive.
/// Must be held for the lifetime of the application.
pub struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
    _stderr_guard: tracing_appender::non_blocking::WorkerGuard,
}
