//! Fleet Controller - Workspace-scoped reconcile loops
//!
//! A [`Controller`] owns a rate-limited delay queue of
//! [`WorkspaceKey`](fleet_types::WorkspaceKey)s and a fixed pool of
//! workers that drive an injected [`Reconciler`]. Failed keys are requeued
//! with backoff up to `max_retries`, then dropped, reported to the
//! [`ErrorSink`] and the controller reports itself unhealthy for a grace
//! period.
//!
//! ## Composition
//!
//! - [`Reconciler`]: business logic for one key
//! - [`Enqueuer`]: how producers (informers, resync timers) add work
//! - [`HealthReporter`]: liveness readout for an external health surface
//! - [`MetricsSink`] / [`ErrorSink`]: injected, never global
//!
//! Optional [`CircuitBreaker`](fleet_resilience::CircuitBreaker) gating
//! and [`RetryManager`](fleet_resilience::RetryManager) error
//! classification are attached through [`ControllerBuilder`].

#![deny(unsafe_code)]

pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod sink;
pub mod traits;
pub mod workspace;

pub use config::{ControllerConfig, RateLimiterConfig};
pub use controller::{Controller, ControllerBuilder, ControllerStats};
pub use error::{ControllerError, ControllerResult};
pub use metrics::{MetricsSink, NoOpMetrics, PrometheusMetrics, ReconcileOutcome};
pub use queue::{
    ItemExponentialRateLimiter, MaxOfRateLimiter, RateLimiter, RateLimitingQueue,
    TokenBucketRateLimiter,
};
pub use sink::{ErrorSink, TracingErrorSink};
pub use traits::{Enqueuer, HealthReporter, ReconcileContext, Reconciler};
pub use workspace::{WorkspaceGuard, WorkspaceScoped, WILDCARD_WORKSPACE};
