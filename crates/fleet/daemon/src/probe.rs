//! Cluster probes
//!
//! A probe contacts one managed cluster and returns the component reports
//! it collected along with the round-trip latency.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleet_types::{ComponentStatus, Condition, ConditionSeverity, ConditionStatus, WorkspaceKey};
use rand::Rng;

use crate::config::ProbeConfig;

/// Condition type reported by the connectivity component.
pub const CONNECTION_CONDITION: &str = "Connection";

/// Condition type reported by the registration component.
pub const REGISTRATION_CONDITION: &str = "Registered";

/// Result of one successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub latency: Duration,
    pub components: Vec<ComponentStatus>,
}

/// Contacts a managed cluster.
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    async fn probe(&self, cluster: &WorkspaceKey) -> anyhow::Result<ProbeReport>;
}

/// Connectivity component for a probe failure.
pub fn connection_failed(reason: &str, message: impl Into<String>) -> ComponentStatus {
    let now = Utc::now();
    ComponentStatus::new("connection")
        .critical()
        .with_condition(
            Condition::new(
                CONNECTION_CONDITION,
                ConditionStatus::False,
                ConditionSeverity::Error,
                reason,
                message,
            )
            .at(now),
        )
        .updated_at(now)
}

/// Probe that fakes latency and failures; used when no real cluster
/// transport is wired in.
pub struct SimulatedProbe {
    config: ProbeConfig,
}

impl SimulatedProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterProbe for SimulatedProbe {
    async fn probe(&self, cluster: &WorkspaceKey) -> anyhow::Result<ProbeReport> {
        let (failed, latency_ms) = {
            let mut rng = rand::thread_rng();
            let failed = rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0));
            let max_ms = self.config.max_latency_ms.max(self.config.min_latency_ms);
            let latency_ms = rng.gen_range(self.config.min_latency_ms..=max_ms);
            (failed, latency_ms)
        };
        let latency = Duration::from_millis(latency_ms);

        tokio::time::sleep(latency).await;

        if failed {
            anyhow::bail!("connection refused by {}", cluster.resource());
        }

        let now = Utc::now();
        let components = vec![
            ComponentStatus::new("connection")
                .critical()
                .with_condition(
                    Condition::new(
                        CONNECTION_CONDITION,
                        ConditionStatus::True,
                        ConditionSeverity::Info,
                        "ProbeSucceeded",
                        "api server reachable",
                    )
                    .at(now),
                )
                .updated_at(now),
            ComponentStatus::new("registration")
                .with_condition(
                    Condition::new(
                        REGISTRATION_CONDITION,
                        ConditionStatus::True,
                        ConditionSeverity::Info,
                        "AgentRegistered",
                        "cluster agent registered",
                    )
                    .at(now),
                )
                .updated_at(now),
        ];

        Ok(ProbeReport {
            latency,
            components,
        })
    }
}
