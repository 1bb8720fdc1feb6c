//! # Fleet Resilience - Circuit Breaking and Classified Retry
//!
//! Failure-handling primitives used by the fleet controller loop and by
//! resource reconcilers that call out to remote clusters.
//!
//! ## Key Components
//!
//! - [`CircuitBreaker`]: Closed / Open / HalfOpen state machine gating attempts
//! - [`CircuitBreakerRegistry`]: One breaker per operation class
//! - [`RetryPolicy`]: Immutable backoff configuration plus error classifiers
//! - [`RetryManager`]: Decides retry-vs-fail and computes backoff
//! - [`retry::ErrorClassifier`]: Pluggable "is this retryable" predicates
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleet_resilience::{
//!     retry::{ConflictErrorClassifier, NetworkErrorClassifier},
//!     RetryContext, RetryManager, RetryPolicy,
//! };
//! use fleet_types::{WorkItem, WorkspaceKey};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .base_delay(Duration::from_millis(200))
//!     .classifier(NetworkErrorClassifier::new())
//!     .classifier(ConflictErrorClassifier::new().with_backoff(Duration::from_millis(50)))
//!     .build()?;
//!
//! let manager = RetryManager::new(policy);
//! let mut item = WorkItem::new(WorkspaceKey::new("team-a", "clusters/east")?);
//!
//! manager
//!     .retry_with_backoff(&RetryContext::background(), &mut item, |_item| async {
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerStats, CircuitState, StateChange, StateChangeListener,
};
pub use config::{CircuitBreakerConfig, ClassifierConfig, RetryPolicyConfig};
pub use error::{BreakerError, ResilienceError, ResilienceResult, RetryError};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryContext, RetryManager, RetryPolicy, RetryPolicyBuilder};
