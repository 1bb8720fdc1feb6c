//! In-memory cluster status store

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_types::{ClusterHealth, Condition, WorkspaceKey};
use serde::{Deserialize, Serialize};

/// What the last reconcile learned from the cluster probe.
///
/// Aggregation folds every critical failure into `CriticalComponentsFailed`,
/// so the store keeps the probe outcome alongside the conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeOutcome {
    Succeeded,
    Failed,
    /// The probe was skipped because its breaker is open.
    CircuitOpen,
}

impl ProbeOutcome {
    /// Reason set on the `Connection` condition reported for this outcome.
    pub fn reason(&self) -> &'static str {
        match self {
            ProbeOutcome::Succeeded => "ProbeSucceeded",
            ProbeOutcome::Failed => "ProbeFailed",
            ProbeOutcome::CircuitOpen => "CircuitOpen",
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Last aggregated status of one managed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub key: String,
    pub conditions: Vec<Condition>,
    pub health: ClusterHealth,
    pub probe: ProbeOutcome,
    pub observed_at: DateTime<Utc>,
}

/// Status records keyed by cluster.
#[derive(Debug, Default)]
pub struct StatusStore {
    statuses: DashMap<WorkspaceKey, ClusterStatus>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &WorkspaceKey) -> Option<ClusterStatus> {
        self.statuses.get(key).map(|entry| entry.value().clone())
    }

    /// Store `status`, returning whether the cluster's health changed.
    pub fn put(&self, key: WorkspaceKey, status: ClusterStatus) -> bool {
        let health = status.health;
        match self.statuses.insert(key, status) {
            Some(previous) => previous.health != health,
            None => true,
        }
    }

    pub fn remove(&self, key: &WorkspaceKey) -> Option<ClusterStatus> {
        self.statuses.remove(key).map(|(_, status)| status)
    }

    /// Every stored status, sorted by key.
    pub fn list(&self) -> Vec<ClusterStatus> {
        let mut statuses: Vec<ClusterStatus> =
            self.statuses.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Stored statuses belonging to `workspace`.
    pub fn list_workspace(&self, workspace: &str) -> Vec<ClusterStatus> {
        self.list()
            .into_iter()
            .filter(|status| {
                WorkspaceKey::parse(&status.key)
                    .map(|key| key.workspace() == workspace)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
