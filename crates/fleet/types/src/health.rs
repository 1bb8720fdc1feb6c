//! Coarse cluster health classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of a managed cluster, derived from its aggregated conditions.
///
/// Always recomputed from conditions; never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterHealth {
    /// All conditions healthy.
    Healthy,

    /// Operational, but too many conditions carry warnings.
    Degraded,

    /// At least one critical condition failed.
    Unhealthy,

    /// Not enough information to judge.
    Unknown,
}

impl ClusterHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ClusterHealth::Healthy)
    }
}

impl fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterHealth::Healthy => write!(f, "healthy"),
            ClusterHealth::Degraded => write!(f, "degraded"),
            ClusterHealth::Unhealthy => write!(f, "unhealthy"),
            ClusterHealth::Unknown => write!(f, "unknown"),
        }
    }
}
