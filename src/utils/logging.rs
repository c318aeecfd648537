//! Tracing subscriber setup
//!
//! Human-readable or JSON records go to stderr so that stdout stays free for
//! command output. An optional daily-rolling file sink is added on top.

use crate::config::LoggingConfig;
use std::io;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Log file name prefix
pub const LOG_FILE_PREFIX: &str = "radiocal.log";

/// Logging setup errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Configured level is not a valid filter directive
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    /// Log directory could not be created
    #[error("Log directory error: {0}")]
    Io(#[from] io::Error),

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Build the filter; `RUST_LOG` wins over the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive for as long as file logging should work.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match (config.file_logging, config.directory.as_ref()) {
        (true, Some(dir)) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let (text_layer, json_layer) = if config.json {
        (None, Some(fmt::layer().json().with_writer(io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(level = %config.level, json = config.json, "Logging initialized");
    Ok(guard)
}
