//! Process-wide tracing subscriber.

use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

/// Subscriber installation failure.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Filter directive that `EnvFilter` rejects.
    #[error("invalid log level {level:?}: {message}")]
    InvalidLevel {
        /// Directive given.
        level: String,
        /// Parser message.
        message: String,
    },
    /// Another global subscriber is already set.
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Installs a `fmt` subscriber filtered by `level`, e.g. `info` or
/// `meridian::engine=debug`. `RUST_LOG` wins when set.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidLevel {
            level: level.to_string(),
            message: e.to_string(),
        })?,
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
