//! Error types for fleet-status crate.

use thiserror::Error;

/// Errors raised while configuring status aggregation.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for status operations.
pub type StatusResult<T> = Result<T, StatusError>;
