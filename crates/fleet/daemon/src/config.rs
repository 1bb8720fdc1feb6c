//! Configuration for fleet-daemon

use std::time::Duration;

use fleet_controller::ControllerConfig;
use fleet_resilience::{CircuitBreakerConfig, ClassifierConfig, RetryPolicyConfig};
use fleet_status::AggregatorConfig;
use fleet_types::WorkspaceKey;
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};
use crate::probe::CONNECTION_CONDITION;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Controller loop configuration
    #[serde(default = "default_controller")]
    pub controller: ControllerConfig,

    /// Status aggregation configuration
    #[serde(default = "default_aggregator")]
    pub aggregator: AggregatorConfig,

    /// Circuit breaker guarding cluster probes
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Error classification for failed reconciles
    #[serde(default = "default_retry")]
    pub retry: RetryPolicyConfig,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Simulated probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            aggregator: default_aggregator(),
            breaker: BreakerSettings::default(),
            retry: default_retry(),
            health: HealthCheckConfig::default(),
            probe: ProbeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Circuit breaker settings in file-friendly units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Seconds to wait before probing again
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,

    /// Half-open successes needed to close
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            timeout_secs: default_breaker_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerSettings {
    pub fn into_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.max_failures,
            timeout: Duration::from_secs(self.timeout_secs),
            success_threshold: self.success_threshold,
            on_state_change: None,
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between full resyncs of every known cluster
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Heartbeat age after which a cluster is considered unreachable
    #[serde(default = "default_heartbeat_stale")]
    pub heartbeat_stale_secs: u64,

    /// Probe latency above which the latency condition degrades
    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,

    /// Seed clusters as `workspace|resource` keys
    #[serde(default)]
    pub clusters: Vec<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            heartbeat_stale_secs: default_heartbeat_stale(),
            max_latency_ms: default_max_latency(),
            clusters: Vec::new(),
        }
    }
}

impl HealthCheckConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn heartbeat_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.heartbeat_stale_secs).unwrap_or(i64::MAX))
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }

    /// Parse the seed cluster keys.
    pub fn cluster_keys(&self) -> DaemonResult<Vec<WorkspaceKey>> {
        self.clusters
            .iter()
            .map(|raw| {
                WorkspaceKey::parse(raw)
                    .map_err(|e| DaemonError::Config(format!("Invalid cluster key {raw:?}: {e}")))
            })
            .collect()
    }
}

/// Simulated probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probability in `[0, 1]` that a probe fails
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Lower bound of simulated latency
    #[serde(default = "default_min_latency")]
    pub min_latency_ms: u64,

    /// Upper bound of simulated latency
    #[serde(default = "default_probe_max_latency")]
    pub max_latency_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            min_latency_ms: default_min_latency(),
            max_latency_ms: default_probe_max_latency(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_controller() -> ControllerConfig {
    ControllerConfig::named("cluster-health")
}

fn default_aggregator() -> AggregatorConfig {
    AggregatorConfig::default().with_critical_type(CONNECTION_CONDITION)
}

fn default_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        classifiers: vec![
            ClassifierConfig::Network { backoff_ms: None },
            ClassifierConfig::Conflict {
                backoff_ms: Some(100),
            },
        ],
        ..Default::default()
    }
}

fn default_max_failures() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    3
}

fn default_resync_interval() -> u64 {
    30
}

fn default_heartbeat_stale() -> u64 {
    90
}

fn default_max_latency() -> u64 {
    500
}

fn default_failure_rate() -> f64 {
    0.05
}

fn default_min_latency() -> u64 {
    5
}

fn default_probe_max_latency() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and `FLEET_*`
    /// environment variables (`FLEET_CONTROLLER__WORKER_COUNT=4`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with FLEET_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("controller.allowed_workspaces")
                .with_list_parse_key("health.clusters"),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> DaemonResult<()> {
        self.controller.validate()?;
        self.aggregator.validate()?;
        self.breaker.into_breaker_config().validate()?;
        self.retry.clone().into_policy()?;
        self.health.cluster_keys()?;

        if self.health.resync_interval_secs == 0 {
            return Err(DaemonError::Config(
                "health.resync_interval_secs must be > 0".to_string(),
            ));
        }
        if self.health.heartbeat_stale_secs == 0 {
            return Err(DaemonError::Config(
                "health.heartbeat_stale_secs must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.probe.failure_rate) {
            return Err(DaemonError::Config(
                "probe.failure_rate must be within [0, 1]".to_string(),
            ));
        }
        if self.probe.min_latency_ms > self.probe.max_latency_ms {
            return Err(DaemonError::Config(
                "probe.min_latency_ms must not exceed probe.max_latency_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.controller.name, "cluster-health");
        assert_eq!(config.controller.max_retries, 10);
        assert!(config.aggregator.is_critical_type(CONNECTION_CONDITION));
        assert_eq!(config.retry.classifiers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_health_defaults() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_stale_after(), chrono::Duration::seconds(90));
        assert_eq!(config.max_latency(), Duration::from_millis(500));
        assert!(config.cluster_keys().unwrap().is_empty());
    }

    #[test]
    fn test_breaker_settings_convert() {
        let breaker = BreakerSettings::default().into_breaker_config();
        assert_eq!(breaker.max_failures, 5);
        assert_eq!(breaker.timeout, Duration::from_secs(30));
        assert_eq!(breaker.success_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DaemonConfig::default();
        config.health.clusters = vec!["no-delimiter".to_string()];
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        let mut config = DaemonConfig::default();
        config.probe.failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.breaker.max_failures = 0;
        assert!(matches!(config.validate(), Err(DaemonError::Resilience(_))));

        let mut config = DaemonConfig::default();
        config.controller.worker_count = 0;
        assert!(matches!(config.validate(), Err(DaemonError::Controller(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("fleetd-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[controller]
worker_count = 4
allowed_workspaces = ["team-a", "team-b"]

[health]
resync_interval_secs = 5
clusters = ["team-a|clusters/east"]

[logging]
json = true
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.controller.worker_count, 4);
        assert_eq!(config.controller.name, "cluster-health");
        assert_eq!(config.controller.allowed_workspaces, vec!["team-a", "team-b"]);
        assert_eq!(config.health.resync_interval_secs, 5);
        assert_eq!(config.health.heartbeat_stale_secs, 90);
        assert_eq!(config.health.cluster_keys().unwrap().len(), 1);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = DaemonConfig::load(Some("/nonexistent/fleetd")).unwrap();
        assert_eq!(config.controller.worker_count, 2);
        assert_eq!(config.breaker, BreakerSettings::default());
    }
}
