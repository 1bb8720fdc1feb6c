//! Fleet Status - Condition aggregation for managed clusters
//!
//! Folds the conditions reported by a cluster's components (connectivity,
//! registration, heartbeat, ...) into one authoritative condition set with
//! a synthesized `Ready` condition, and classifies the result into a coarse
//! [`ClusterHealth`](fleet_types::ClusterHealth).
//!
//! ## Example
//!
//! ```rust
//! use fleet_status::{AggregatorConfig, StatusAggregator};
//! use fleet_types::{ClusterHealth, ComponentStatus, Condition, ConditionSeverity, ConditionStatus};
//!
//! let aggregator = StatusAggregator::new(AggregatorConfig::default()).unwrap();
//! let components = vec![ComponentStatus::new("conn").critical().with_condition(Condition::new(
//!     "Connection",
//!     ConditionStatus::False,
//!     ConditionSeverity::Error,
//!     "ProbeFailed",
//!     "api server unreachable",
//! ))];
//!
//! let conditions = aggregator.aggregate_cluster_status(&components);
//! assert_eq!(aggregator.compute_overall_health(&conditions), ClusterHealth::Unhealthy);
//! ```

#![deny(unsafe_code)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod history;

pub use aggregator::{
    filter_stale_conditions, filter_stale_conditions_at, is_ready, merge_transition_times,
    reasons, StatusAggregator,
};
pub use config::AggregatorConfig;
pub use error::{StatusError, StatusResult};
pub use history::{ClusterHealthHistory, ClusterRecord, HEARTBEAT_CONDITION, LATENCY_CONDITION};
