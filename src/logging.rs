//! Logging setup using tracing.
//!
//! The library only emits `tracing` events; binaries call [`init`] once to
//! install a formatted stderr subscriber.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
#[error("failed to initialize tracing: {0}")]
pub struct LoggingError(String);

/// Installs the global subscriber.
///
/// Filtering follows `RUST_LOG` when set, otherwise `default_filter`
/// (e.g. `"info"` or `"petal=debug"`).
///
/// # Errors
///
/// Returns [`LoggingError`] if a global subscriber is already installed.
pub fn init(default_filter: &str) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| LoggingError(e.to_string()))
}
