//! Component status reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Conditions reported by one health-reporting subsystem of a managed
/// cluster (connectivity, registration, heartbeat, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component name.
    pub name: String,

    /// Conditions reported by this component.
    pub conditions: Vec<Condition>,

    /// When the component last reported.
    pub last_update_time: DateTime<Utc>,

    /// A failing condition from a critical component fails the cluster.
    pub critical: bool,
}

impl ComponentStatus {
    /// Create a non-critical component with no conditions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            last_update_time: Utc::now(),
            critical: false,
        }
    }

    /// Mark this component as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Add a reported condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the report time.
    pub fn updated_at(mut self, time: DateTime<Utc>) -> Self {
        self.last_update_time = time;
        self
    }
}
