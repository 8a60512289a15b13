//! Tracing setup shared by binaries and long-running services.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("global subscriber already installed")]
    AlreadyInitialized,
}

/// Build the env filter, preferring `RUST_LOG` and falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| LoggingError::InvalidFilter {
            directive: default_directive.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Install the global fmt subscriber.
pub fn init_tracing(default_directive: &str) -> Result<(), LoggingError> {
    let filter = env_filter(default_directive)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
