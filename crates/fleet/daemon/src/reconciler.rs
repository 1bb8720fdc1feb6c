//! Cluster health reconciler
//!
//! Probes one cluster per key, folds the probe's component reports together
//! with heartbeat and latency history, and stores the aggregated conditions.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use fleet_controller::{ReconcileContext, Reconciler};
use fleet_resilience::{BreakerError, CircuitBreakerRegistry};
use fleet_status::{merge_transition_times, ClusterHealthHistory, StatusAggregator};
use fleet_types::WorkspaceKey;
use tracing::{debug, info, instrument, warn};

use crate::config::HealthCheckConfig;
use crate::probe::{connection_failed, ClusterProbe};
use crate::store::{ClusterStatus, ProbeOutcome, StatusStore};

/// Operation class name of the breaker guarding probes of `key`.
pub fn probe_operation(key: &WorkspaceKey) -> String {
    format!("probe/{key}")
}

/// Reconciles the health status of managed clusters.
pub struct ClusterHealthReconciler {
    probe: Arc<dyn ClusterProbe>,
    breakers: Arc<CircuitBreakerRegistry>,
    aggregator: StatusAggregator,
    history: Arc<ClusterHealthHistory>,
    store: Arc<StatusStore>,
    health: HealthCheckConfig,
}

impl ClusterHealthReconciler {
    pub fn new(
        probe: Arc<dyn ClusterProbe>,
        breakers: Arc<CircuitBreakerRegistry>,
        aggregator: StatusAggregator,
        history: Arc<ClusterHealthHistory>,
        store: Arc<StatusStore>,
        health: HealthCheckConfig,
    ) -> Self {
        Self {
            probe,
            breakers,
            aggregator,
            history,
            store,
            health,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<ClusterHealthHistory> {
        &self.history
    }
}

#[async_trait]
impl Reconciler for ClusterHealthReconciler {
    #[instrument(skip(self, ctx), fields(cluster = %key, attempt = ctx.item().attempts))]
    async fn reconcile(&self, ctx: &ReconcileContext, key: &WorkspaceKey) -> anyhow::Result<()> {
        let breaker = self.breakers.breaker(&probe_operation(key));
        let probe = Arc::clone(&self.probe);

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => {
                return Err(anyhow!("probe of {key} interrupted by shutdown"));
            }
            outcome = breaker.execute(|| probe.probe(key)) => outcome,
        };

        let now = Utc::now();
        let cluster = key.as_str();
        let mut components = Vec::new();

        // An open breaker is recorded but not retried; the next resync probes again.
        let (probe_outcome, failure) = match outcome {
            Ok(report) => {
                self.history
                    .record_heartbeat(cluster, now, Some(report.latency));
                components.extend(report.components);
                (ProbeOutcome::Succeeded, None)
            }
            Err(BreakerError::Open { breaker }) => {
                debug!(breaker = %breaker, "Probe skipped, circuit open");
                components.push(connection_failed(
                    ProbeOutcome::CircuitOpen.reason(),
                    "probes suspended after repeated failures",
                ));
                (ProbeOutcome::CircuitOpen, None)
            }
            Err(BreakerError::Operation(err)) => {
                warn!(error = %format!("{err:#}"), "Cluster probe failed");
                components.push(connection_failed(
                    ProbeOutcome::Failed.reason(),
                    "cluster probe failed",
                ));
                (
                    ProbeOutcome::Failed,
                    Some(err.context(format!("probe of {key} failed"))),
                )
            }
        };

        components.push(self.history.heartbeat_component(
            cluster,
            self.health.heartbeat_stale_after(),
            now,
        ));
        components.push(
            self.history
                .latency_component(cluster, self.health.max_latency(), now),
        );

        let conditions = self.aggregator.aggregate_cluster_status(&components);
        let previous = self
            .store
            .get(key)
            .map(|status| status.conditions)
            .unwrap_or_default();
        let conditions = merge_transition_times(&previous, conditions);
        let health = self.aggregator.compute_overall_health(&conditions);

        let changed = self.store.put(
            key.clone(),
            ClusterStatus {
                key: key.to_string(),
                conditions,
                health,
                probe: probe_outcome,
                observed_at: now,
            },
        );
        if changed {
            info!(health = %health, probe = %probe_outcome, "Cluster health changed");
        } else {
            debug!(health = %health, probe = %probe_outcome, "Cluster health unchanged");
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeReport, CONNECTION_CONDITION};
    use fleet_resilience::{CircuitBreakerConfig, CircuitState};
    use fleet_status::AggregatorConfig;
    use fleet_types::{
        find_condition, ClusterHealth, ComponentStatus, Condition, ConditionSeverity,
        ConditionStatus, WorkItem, READY_CONDITION,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Replays scripted probe results; `Ok` reports one healthy connection.
    struct ScriptedProbe {
        results: Mutex<Vec<Result<Duration, String>>>,
    }

    impl ScriptedProbe {
        fn new(results: Vec<Result<Duration, String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
            })
        }
    }

    #[async_trait]
    impl ClusterProbe for ScriptedProbe {
        async fn probe(&self, _cluster: &WorkspaceKey) -> anyhow::Result<ProbeReport> {
            let next = {
                let mut results = self.results.lock().unwrap();
                if results.is_empty() {
                    Ok(Duration::from_millis(10))
                } else {
                    results.remove(0)
                }
            };
            match next {
                Ok(latency) => Ok(ProbeReport {
                    latency,
                    components: vec![ComponentStatus::new("connection").critical().with_condition(
                        Condition::new(
                            CONNECTION_CONDITION,
                            ConditionStatus::True,
                            ConditionSeverity::Info,
                            "ProbeSucceeded",
                            "api server reachable",
                        ),
                    )],
                }),
                Err(message) => Err(anyhow!(message)),
            }
        }
    }

    fn reconciler(probe: Arc<dyn ClusterProbe>, max_failures: u32) -> ClusterHealthReconciler {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            max_failures,
            timeout: Duration::from_secs(3600),
            success_threshold: 1,
            on_state_change: None,
        })
        .unwrap();
        ClusterHealthReconciler::new(
            probe,
            Arc::new(breakers),
            StatusAggregator::new(AggregatorConfig::default().with_critical_type(CONNECTION_CONDITION))
                .unwrap(),
            Arc::new(ClusterHealthHistory::new()),
            Arc::new(StatusStore::new()),
            HealthCheckConfig::default(),
        )
    }

    fn key() -> WorkspaceKey {
        WorkspaceKey::parse("team-a|clusters/east").unwrap()
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext::new("cluster-health", WorkItem::new(key()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_successful_probe_stores_healthy_status() {
        let reconciler = reconciler(ScriptedProbe::new(vec![]), 3);

        reconciler.reconcile(&ctx(), &key()).await.unwrap();

        let status = reconciler.store().get(&key()).unwrap();
        assert_eq!(status.health, ClusterHealth::Healthy);
        assert_eq!(status.probe, ProbeOutcome::Succeeded);
        assert!(find_condition(&status.conditions, READY_CONDITION).unwrap().is_true());
        assert!(reconciler.history().last_heartbeat(key().as_str()).is_some());
        assert_eq!(
            reconciler.history().last_latency(key().as_str()),
            Some(Duration::from_millis(10))
        );
    }

    #[tokio::test]
    async fn test_failed_probe_marks_cluster_unhealthy_and_errors() {
        let reconciler = reconciler(
            ScriptedProbe::new(vec![Err("connection refused".to_string())]),
            3,
        );

        let err = reconciler.reconcile(&ctx(), &key()).await.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));

        let status = reconciler.store().get(&key()).unwrap();
        assert_eq!(status.health, ClusterHealth::Unhealthy);
        assert_eq!(status.probe, ProbeOutcome::Failed);
        let connection = find_condition(&status.conditions, CONNECTION_CONDITION).unwrap();
        assert!(connection.is_false());
        assert!(connection.message.contains("connection"));
    }

    #[tokio::test]
    async fn test_open_breaker_skips_probe_without_error() {
        let reconciler = reconciler(
            ScriptedProbe::new(vec![Err("connection refused".to_string())]),
            1,
        );

        assert!(reconciler.reconcile(&ctx(), &key()).await.is_err());
        let breaker = reconciler.breakers.breaker(&probe_operation(&key()));
        assert_eq!(breaker.state(), CircuitState::Open);

        reconciler.reconcile(&ctx(), &key()).await.unwrap();
        let status = reconciler.store().get(&key()).unwrap();
        assert_eq!(status.probe, ProbeOutcome::CircuitOpen);
        assert!(find_condition(&status.conditions, CONNECTION_CONDITION)
            .unwrap()
            .is_false());
        assert_eq!(status.health, ClusterHealth::Unhealthy);
    }

    #[tokio::test]
    async fn test_transition_times_survive_repeated_reconciles() {
        let reconciler = reconciler(ScriptedProbe::new(vec![]), 3);

        reconciler.reconcile(&ctx(), &key()).await.unwrap();
        let first = reconciler.store().get(&key()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        reconciler.reconcile(&ctx(), &key()).await.unwrap();
        let second = reconciler.store().get(&key()).unwrap();

        let ready_first = find_condition(&first.conditions, READY_CONDITION).unwrap();
        let ready_second = find_condition(&second.conditions, READY_CONDITION).unwrap();
        assert_eq!(
            ready_first.last_transition_time,
            ready_second.last_transition_time
        );
        assert!(second.observed_at >= first.observed_at);
    }

    #[tokio::test]
    async fn test_cancelled_context_interrupts_probe() {
        let reconciler = reconciler(ScriptedProbe::new(vec![]), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ReconcileContext::new("cluster-health", WorkItem::new(key()), cancel);

        assert!(reconciler.reconcile(&ctx, &key()).await.is_err());
        assert!(reconciler.store().get(&key()).is_none());
    }
}
