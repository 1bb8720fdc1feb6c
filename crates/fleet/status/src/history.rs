//! Per-cluster heartbeat and latency history.
//!
//! Reconcilers running on several workers share one history, so the map is
//! a [`DashMap`] and every record is updated in place under its shard lock.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fleet_types::{ComponentStatus, Condition, ConditionSeverity, ConditionStatus};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Condition type reported by [`ClusterHealthHistory::heartbeat_component`].
pub const HEARTBEAT_CONDITION: &str = "Heartbeat";

/// Condition type reported by [`ClusterHealthHistory::latency_component`].
pub const LATENCY_CONDITION: &str = "Latency";

/// Last observed liveness data for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub last_heartbeat: DateTime<Utc>,
    pub last_latency: Option<StdDuration>,
}

/// Concurrent map of cluster name to [`ClusterRecord`].
#[derive(Debug, Default)]
pub struct ClusterHealthHistory {
    records: DashMap<String, ClusterRecord>,
}

impl ClusterHealthHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat observed at `at`, optionally with its round-trip latency.
    ///
    /// An older heartbeat never replaces a newer one.
    pub fn record_heartbeat(&self, cluster: &str, at: DateTime<Utc>, latency: Option<StdDuration>) {
        trace!(cluster, at = %at, "Recording heartbeat");
        self.records
            .entry(cluster.to_string())
            .and_modify(|record| {
                if at >= record.last_heartbeat {
                    record.last_heartbeat = at;
                    if latency.is_some() {
                        record.last_latency = latency;
                    }
                }
            })
            .or_insert_with(|| ClusterRecord {
                last_heartbeat: at,
                last_latency: latency,
            });
    }

    pub fn record(&self, cluster: &str) -> Option<ClusterRecord> {
        self.records.get(cluster).map(|r| r.clone())
    }

    pub fn last_heartbeat(&self, cluster: &str) -> Option<DateTime<Utc>> {
        self.records.get(cluster).map(|r| r.last_heartbeat)
    }

    pub fn last_latency(&self, cluster: &str) -> Option<StdDuration> {
        self.records.get(cluster).and_then(|r| r.last_latency)
    }

    /// Forget a cluster, e.g. when it is deregistered.
    pub fn remove(&self, cluster: &str) -> Option<ClusterRecord> {
        self.records.remove(cluster).map(|(_, r)| r)
    }

    /// Tracked cluster names, sorted.
    pub fn clusters(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Turn heartbeat age into a critical `heartbeat` component.
    ///
    /// - no heartbeat: `Unknown` / `NoHeartbeat`
    /// - older than `stale_after`: `False` / `HeartbeatStale` (error)
    /// - otherwise: `True` / `HeartbeatRecent`
    pub fn heartbeat_component(
        &self,
        cluster: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> ComponentStatus {
        let condition = match self.last_heartbeat(cluster) {
            None => Condition::new(
                HEARTBEAT_CONDITION,
                ConditionStatus::Unknown,
                ConditionSeverity::Warning,
                "NoHeartbeat",
                format!("no heartbeat received from {cluster}"),
            ),
            Some(at) => {
                let age = now.signed_duration_since(at);
                if age > stale_after {
                    Condition::new(
                        HEARTBEAT_CONDITION,
                        ConditionStatus::False,
                        ConditionSeverity::Error,
                        "HeartbeatStale",
                        format!("no heartbeat within {}s", stale_after.num_seconds()),
                    )
                } else {
                    Condition::new(
                        HEARTBEAT_CONDITION,
                        ConditionStatus::True,
                        ConditionSeverity::Info,
                        "HeartbeatRecent",
                        "heartbeat within expected interval",
                    )
                }
            }
        };

        ComponentStatus::new("heartbeat")
            .critical()
            .with_condition(condition.at(now))
            .updated_at(now)
    }

    /// Turn the last latency sample into a non-critical `latency` component.
    pub fn latency_component(
        &self,
        cluster: &str,
        max_latency: StdDuration,
        now: DateTime<Utc>,
    ) -> ComponentStatus {
        let condition = match self.last_latency(cluster) {
            None => Condition::new(
                LATENCY_CONDITION,
                ConditionStatus::Unknown,
                ConditionSeverity::Info,
                "NoLatencySample",
                "no latency sample recorded",
            ),
            Some(latency) if latency > max_latency => Condition::new(
                LATENCY_CONDITION,
                ConditionStatus::False,
                ConditionSeverity::Warning,
                "LatencyHigh",
                format!("latency exceeds {}ms", max_latency.as_millis()),
            ),
            Some(_) => Condition::new(
                LATENCY_CONDITION,
                ConditionStatus::True,
                ConditionSeverity::Info,
                "LatencyNormal",
                "latency within bounds",
            ),
        };

        ComponentStatus::new("latency")
            .with_condition(condition.at(now))
            .updated_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_older_heartbeat_is_ignored() {
        let history = ClusterHealthHistory::new();
        let now = Utc::now();

        history.record_heartbeat("east", now, Some(StdDuration::from_millis(12)));
        history.record_heartbeat("east", now - Duration::seconds(30), Some(StdDuration::from_millis(900)));

        assert_eq!(history.last_heartbeat("east"), Some(now));
        assert_eq!(history.last_latency("east"), Some(StdDuration::from_millis(12)));
    }

    #[test]
    fn test_heartbeat_component_states() {
        let history = ClusterHealthHistory::new();
        let now = Utc::now();
        let stale_after = Duration::seconds(60);

        let missing = history.heartbeat_component("east", stale_after, now);
        assert!(missing.critical);
        assert_eq!(missing.conditions[0].status, ConditionStatus::Unknown);

        history.record_heartbeat("east", now - Duration::seconds(10), None);
        let recent = history.heartbeat_component("east", stale_after, now);
        assert_eq!(recent.conditions[0].status, ConditionStatus::True);

        history.record_heartbeat("west", now - Duration::seconds(120), None);
        let stale = history.heartbeat_component("west", stale_after, now);
        assert_eq!(stale.conditions[0].status, ConditionStatus::False);
        assert_eq!(stale.conditions[0].severity, ConditionSeverity::Error);
        assert_eq!(stale.conditions[0].reason, "HeartbeatStale");
    }

    #[test]
    fn test_latency_component() {
        let history = ClusterHealthHistory::new();
        let now = Utc::now();
        history.record_heartbeat("east", now, Some(StdDuration::from_millis(750)));

        let component = history.latency_component("east", StdDuration::from_millis(500), now);
        assert!(!component.critical);
        assert_eq!(component.conditions[0].reason, "LatencyHigh");
    }

    #[test]
    fn test_concurrent_writers() {
        let history = Arc::new(ClusterHealthHistory::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let history = history.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        history.record_heartbeat(
                            &format!("cluster-{}", j % 4),
                            now + Duration::milliseconds(i * 100 + j),
                            None,
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(history.len(), 4);
        assert_eq!(
            history.clusters(),
            vec!["cluster-0", "cluster-1", "cluster-2", "cluster-3"]
        );
        assert_eq!(
            history.last_heartbeat("cluster-3"),
            Some(now + Duration::milliseconds(799)),
        );
        assert!(history.remove("cluster-0").is_some());
        assert_eq!(history.len(), 3);
    }
}
