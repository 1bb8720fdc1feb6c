//! Error types for fleet-daemon

use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller construction or runtime error
    #[error("Controller error: {0}")]
    Controller(#[from] fleet_controller::ControllerError),

    /// Breaker or retry policy error
    #[error("Resilience error: {0}")]
    Resilience(#[from] fleet_resilience::ResilienceError),

    /// Aggregator configuration error
    #[error("Status error: {0}")]
    Status(#[from] fleet_status::StatusError),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
