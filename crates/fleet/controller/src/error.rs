//! Error types for fleet-controller crate.

use fleet_resilience::ResilienceError;
use fleet_types::KeyError;
use thiserror::Error;

/// Errors surfaced by the controller to its callers.
///
/// Reconcile failures never appear here; they are turned into requeue or
/// drop decisions inside the worker loop.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key did not parse as `workspace|resource`.
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    /// Key belongs to a workspace this controller may not touch.
    #[error("workspace {workspace} is not allowed for controller {controller}")]
    WorkspaceDenied {
        controller: String,
        workspace: String,
    },

    /// Controller is shutting down and accepts no new work.
    #[error("controller {0} is shutting down")]
    ShuttingDown(String),

    /// `run` was called twice.
    #[error("controller {0} already started")]
    AlreadyStarted(String),

    /// Metric registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Breaker or retry policy construction failed.
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

impl ControllerError {
    /// Whether this is a workspace isolation rejection.
    pub fn is_denied(&self) -> bool {
        matches!(self, ControllerError::WorkspaceDenied { .. })
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;
