//! Collaborator contracts of the controller loop.

use std::time::Duration;

use async_trait::async_trait;
use fleet_resilience::RetryContext;
use fleet_types::{WorkItem, WorkspaceKey};
use tokio_util::sync::CancellationToken;

use crate::error::ControllerResult;
use crate::workspace::WorkspaceScoped;

/// Per-call context handed to a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    controller: String,
    item: WorkItem,
    cancel: CancellationToken,
}

impl ReconcileContext {
    pub fn new(controller: impl Into<String>, item: WorkItem, cancel: CancellationToken) -> Self {
        Self {
            controller: controller.into(),
            item,
            cancel,
        }
    }

    /// Name of the controller driving this call.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Attempt bookkeeping for the key, including this attempt.
    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    /// Cancelled when the controller shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for an inner retry loop bound to controller shutdown.
    pub fn retry_context(&self) -> RetryContext {
        RetryContext::new(self.cancel.clone())
    }
}

/// Business logic driven by the controller loop.
///
/// Delivery is at-least-once: implementations must be idempotent and
/// return `Ok` only on full success.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, ctx: &ReconcileContext, key: &WorkspaceKey) -> anyhow::Result<()>;
}

/// Producer-facing side of a controller.
pub trait Enqueuer: Send + Sync {
    /// Enqueue a raw `workspace|resource` key.
    fn enqueue_key(&self, key: &str) -> ControllerResult<()>;

    /// Enqueue a raw key once `delay` has elapsed.
    fn enqueue_after(&self, key: &str, delay: Duration) -> ControllerResult<()>;

    /// Enqueue an object by its workspace-scoped key. Objects outside the
    /// allowed workspaces are dropped and counted, never reported as errors.
    /// Returns whether the object was enqueued.
    fn enqueue_object(&self, object: &dyn WorkspaceScoped) -> bool;
}

/// Liveness readout for an external health surface.
pub trait HealthReporter: Send + Sync {
    fn name(&self) -> &str;

    fn is_healthy(&self) -> bool;
}
