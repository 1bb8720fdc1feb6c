//! Fleet Types - Core types for multi-cluster reconciliation
//!
//! Shared vocabulary for the fleet reconciliation core. The controller,
//! resilience and status crates all speak in these types, but none of them
//! owns them.
//!
//! ## Key Concepts
//!
//! - **WorkspaceKey**: `workspace|resource` identifier for one reconcile request
//! - **WorkItem**: Per-key attempt bookkeeping carried by a worker
//! - **Condition**: Typed, timestamped health signal with severity
//! - **ComponentStatus**: Conditions reported by one subsystem of a cluster
//! - **ClusterHealth**: Coarse health derived from a condition set

#![deny(unsafe_code)]

pub mod component;
pub mod condition;
pub mod health;
pub mod key;
pub mod work_item;

pub use component::ComponentStatus;
pub use condition::{
    find_condition, upsert_condition, Condition, ConditionSeverity, ConditionStatus,
    READY_CONDITION,
};
pub use health::ClusterHealth;
pub use key::{KeyError, WorkspaceKey, KEY_DELIMITER};
pub use work_item::WorkItem;
