//! Process-wide error sink for dropped keys.

use fleet_types::WorkspaceKey;
use tracing::error;

/// Receives every key the controller gives up on, exactly once per drop.
pub trait ErrorSink: Send + Sync {
    fn report(&self, controller: &str, key: &WorkspaceKey, error: &anyhow::Error);
}

/// Logs dropped keys at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, controller: &str, key: &WorkspaceKey, err: &anyhow::Error) {
        error!(
            controller,
            key = %key,
            workspace = key.workspace(),
            error = %format!("{err:#}"),
            "Dropping key after reconcile failure"
        );
    }
}
