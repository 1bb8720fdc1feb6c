//! Daemon setup and lifecycle management

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use fleet_controller::{Controller, ControllerStats, Enqueuer, PrometheusMetrics};
use fleet_resilience::{CircuitBreakerRegistry, CircuitBreakerStats, RetryManager, StateChange};
use fleet_status::{ClusterHealthHistory, StatusAggregator};
use fleet_types::WorkspaceKey;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::probe::{ClusterProbe, SimulatedProbe};
use crate::reconciler::{probe_operation, ClusterHealthReconciler};
use crate::resync::run_resync;
use crate::store::{ClusterStatus, StatusStore};

/// Fleet daemon: one cluster-health controller plus its resync timer.
pub struct Daemon {
    config: DaemonConfig,
    controller: Arc<Controller>,
    clusters: Arc<DashSet<WorkspaceKey>>,
    breakers: Arc<CircuitBreakerRegistry>,
    history: Arc<ClusterHealthHistory>,
    store: Arc<StatusStore>,
    registry: Registry,
}

impl Daemon {
    /// Create a daemon that probes clusters with [`SimulatedProbe`].
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let probe = Arc::new(SimulatedProbe::new(config.probe.clone()));
        Self::with_probe(config, probe)
    }

    /// Create a daemon with a custom cluster probe.
    pub fn with_probe(config: DaemonConfig, probe: Arc<dyn ClusterProbe>) -> DaemonResult<Self> {
        config.validate()?;

        let listener = Arc::new(|change: StateChange| {
            info!(
                breaker = %change.breaker,
                from = %change.from,
                to = %change.to,
                "Circuit breaker state changed"
            );
        });
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.breaker.into_breaker_config().with_listener(listener),
        )?);

        let history = Arc::new(ClusterHealthHistory::new());
        let store = Arc::new(StatusStore::new());
        let reconciler = Arc::new(ClusterHealthReconciler::new(
            probe,
            breakers.clone(),
            StatusAggregator::new(config.aggregator.clone())?,
            history.clone(),
            store.clone(),
            config.health.clone(),
        ));

        let registry = Registry::new_custom(Some("fleet".to_string()), None)?;
        let metrics = Arc::new(PrometheusMetrics::register(&registry)?);

        let controller = Controller::builder(config.controller.clone(), reconciler)
            .metrics(metrics)
            .retry_manager(RetryManager::new(config.retry.clone().into_policy()?))
            .build()?;

        let clusters = Arc::new(DashSet::new());
        for key in config.health.cluster_keys()? {
            clusters.insert(key);
        }

        Ok(Self {
            config,
            controller,
            clusters,
            breakers,
            history,
            store,
            registry,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<ClusterHealthHistory> {
        &self.history
    }

    /// Registry holding the controller collectors.
    pub fn metrics_registry(&self) -> &Registry {
        &self.registry
    }

    /// Start tracking a cluster and reconcile it right away.
    pub fn register_cluster(&self, key: WorkspaceKey) -> DaemonResult<()> {
        self.controller.enqueue(key.clone())?;
        if self.clusters.insert(key.clone()) {
            info!(cluster = %key, "Cluster registered");
        }
        Ok(())
    }

    /// Stop tracking a cluster and forget its status and breaker.
    pub fn deregister_cluster(&self, key: &WorkspaceKey) -> bool {
        let removed = self.clusters.remove(key).is_some();
        self.store.remove(key);
        self.history.remove(key.as_str());
        self.breakers.remove(&probe_operation(key));
        if removed {
            info!(cluster = %key, "Cluster deregistered");
        }
        removed
    }

    /// Record a heartbeat pushed by a cluster agent and reconcile the cluster.
    /// Heartbeats from denied workspaces leave no trace in the history.
    pub fn record_heartbeat(&self, key: &WorkspaceKey, latency: Option<Duration>) -> DaemonResult<()> {
        self.controller.workspaces().validate(key)?;
        self.history
            .record_heartbeat(key.as_str(), Utc::now(), latency);
        self.register_cluster(key.clone())
    }

    /// Registered clusters, sorted.
    pub fn clusters(&self) -> Vec<WorkspaceKey> {
        let mut keys: Vec<WorkspaceKey> = self.clusters.iter().map(|key| key.key().clone()).collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    pub fn cluster_status(&self, key: &WorkspaceKey) -> Option<ClusterStatus> {
        self.store.get(key)
    }

    pub fn controller_stats(&self) -> ControllerStats {
        self.controller.stats()
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.snapshot()
    }

    /// Run until `cancel` fires, then stop the resync timer and the
    /// controller and wait for pending breaker notifications.
    pub async fn run(&self, cancel: CancellationToken) -> DaemonResult<()> {
        info!(
            controller = %self.controller.name(),
            clusters = self.clusters.len(),
            "Fleet daemon starting"
        );

        let tasks = TaskTracker::new();
        let resync_cancel = cancel.child_token();
        let enqueuer: Arc<dyn Enqueuer> = self.controller.clone();
        tasks.spawn(run_resync(
            enqueuer,
            self.clusters.clone(),
            self.config.health.resync_interval(),
            resync_cancel.clone(),
        ));
        tasks.close();

        let result = self.controller.clone().run(cancel).await;

        resync_cancel.cancel();
        tasks.wait().await;
        self.breakers.drain_notifications().await;

        let stats = self.controller.stats();
        if stats.dropped > 0 {
            warn!(dropped = stats.dropped, "Clusters were dropped after repeated failures");
        }
        info!(
            processed = stats.processed,
            errors = stats.errors,
            "Fleet daemon stopped"
        );

        result.map_err(Into::into)
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
