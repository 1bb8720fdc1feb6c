//! Fleet Daemon - cluster health reconciliation service
//!
//! The fleet daemon provides:
//! - A cluster-health controller built on `fleet-controller`
//! - Probes guarded by per-cluster circuit breakers
//! - Condition aggregation into an in-memory status store
//! - A periodic resync of every registered cluster

pub mod config;
pub mod daemon;
pub mod error;
pub mod probe;
pub mod reconciler;
pub mod resync;
pub mod store;

pub use config::{BreakerSettings, DaemonConfig, HealthCheckConfig, LoggingConfig, ProbeConfig};
pub use daemon::{shutdown_signal, Daemon};
pub use error::{DaemonError, DaemonResult};
pub use probe::{ClusterProbe, ProbeReport, SimulatedProbe, CONNECTION_CONDITION};
pub use reconciler::ClusterHealthReconciler;
pub use store::{ClusterStatus, ProbeOutcome, StatusStore};
