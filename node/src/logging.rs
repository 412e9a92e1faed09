//! Logging setup for the node binaries

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to set global default subscriber: {0}")]
    AlreadyInitialized(String),
}

/// Filter directive applying `level` to the dagchain crates
pub fn filter_directive(level: &str) -> String {
    format!("dagchain_core={level},node={level},dagchain_node={level}")
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(&config.level))
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    info!("Logging initialized at level {}", config.level);
    Ok(())
}
