//! Structured logging for the scraper
//!
//! Sets up two sinks:
//! 1. The terminal, with thread names so pool workers can be told apart
//! 2. A log file next to the binary, written through a non-blocking appender

use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoLocal},
    prelude::*,
};

use crate::scraper::AppConfig;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Level used when `RUST_LOG` is not set.
pub fn default_level(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Initialize the global subscriber. The returned guard must be held until exit
/// or buffered file lines are lost.
pub fn init_logger(config: &AppConfig) -> LoggerResult<WorkerGuard> {
    let log_path = Path::new(&config.paths.log_file);
    let log_dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_path
        .file_name()
        .ok_or_else(|| LoggerError::Logging(format!("invalid log file path: {}", log_path.display())))?;

    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let file_appender = rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level = default_level(config.logging.debug);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    let file_layer = match config.logging.log_format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_timer(ChronoLocal::rfc_3339())
            .boxed(),
        _ => fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .with_timer(ChronoLocal::rfc_3339())
            .with_thread_names(true)
            .boxed(),
    };

    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(ChronoLocal::rfc_3339())
        .with_thread_names(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(terminal_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %config.logging.log_format,
        log_level = level,
        log_file = %log_path.display(),
        "Logger initialized"
    );

    Ok(guard)
}
