//! Controller configuration.

use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, ControllerResult};
use crate::queue::{default_controller_rate_limiter, MaxOfRateLimiter};
use crate::workspace::WILDCARD_WORKSPACE;

/// Configuration for one controller loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller name, used in logs and metric labels.
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Requeues allowed per key before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pending keys above this mark the controller unhealthy.
    #[serde(default = "default_queue_high_water_mark")]
    pub queue_high_water_mark: usize,

    /// How long the controller stays unhealthy after dropping a key.
    #[serde(default = "default_health_recovery_grace_secs")]
    pub health_recovery_grace_secs: u64,

    /// Requeue delay for keys rejected by an open circuit breaker.
    #[serde(default = "default_circuit_open_requeue_delay_ms")]
    pub circuit_open_requeue_delay_ms: u64,

    /// Best-effort wait for in-flight keys on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Workspaces this controller may reconcile. `*` admits every workspace.
    #[serde(default = "default_allowed_workspaces")]
    pub allowed_workspaces: Vec<String>,

    /// Queue-side rate limiting.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

fn default_name() -> String {
    "controller".to_string()
}

fn default_worker_count() -> usize {
    2
}

fn default_max_retries() -> u32 {
    10
}

fn default_queue_high_water_mark() -> usize {
    1000
}

fn default_health_recovery_grace_secs() -> u64 {
    30
}

fn default_circuit_open_requeue_delay_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_allowed_workspaces() -> Vec<String> {
    vec![WILDCARD_WORKSPACE.to_string()]
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            queue_high_water_mark: default_queue_high_water_mark(),
            health_recovery_grace_secs: default_health_recovery_grace_secs(),
            circuit_open_requeue_delay_ms: default_circuit_open_requeue_delay_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            allowed_workspaces: default_allowed_workspaces(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Default configuration under another name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn health_recovery_grace(&self) -> Duration {
        Duration::from_secs(self.health_recovery_grace_secs)
    }

    pub fn circuit_open_requeue_delay(&self) -> Duration {
        Duration::from_millis(self.circuit_open_requeue_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> ControllerResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "controller name must not be empty".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ControllerError::InvalidConfig(
                "worker_count must be > 0".to_string(),
            ));
        }
        if self.queue_high_water_mark == 0 {
            return Err(ControllerError::InvalidConfig(
                "queue_high_water_mark must be > 0".to_string(),
            ));
        }
        self.rate_limiter.validate()
    }
}

/// Per-key exponential backoff combined with an overall token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Sustained requeues per second across all keys.
    #[serde(default = "default_qps")]
    pub qps: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    1000
}

fn default_qps() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    100
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> ControllerResult<()> {
        if self.base_delay_ms == 0 {
            return Err(ControllerError::InvalidConfig(
                "rate_limiter.base_delay_ms must be > 0".to_string(),
            ));
        }
        if Duration::from_secs(self.max_delay_secs) < Duration::from_millis(self.base_delay_ms) {
            return Err(ControllerError::InvalidConfig(
                "rate_limiter.max_delay_secs must be >= base_delay_ms".to_string(),
            ));
        }
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Err(ControllerError::InvalidConfig(format!(
                "rate_limiter.qps must be > 0, got {}",
                self.qps
            )));
        }
        if self.burst == 0 {
            return Err(ControllerError::InvalidConfig(
                "rate_limiter.burst must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the limiter described by this config.
    pub fn build<K>(&self) -> ControllerResult<MaxOfRateLimiter<K>>
    where
        K: Eq + Hash + Clone + Send + 'static,
    {
        self.validate()?;
        Ok(default_controller_rate_limiter(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
            self.qps,
            self.burst,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.queue_high_water_mark, 1000);
        assert_eq!(config.health_recovery_grace(), Duration::from_secs(30));
        assert_eq!(config.allowed_workspaces, vec!["*"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = ControllerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            rate_limiter: RateLimiterConfig {
                qps: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig::named("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{"name": "clusters", "max_retries": 3, "allowed_workspaces": ["team-a"]}"#,
        )
        .unwrap();

        assert_eq!(config.name, "clusters");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.rate_limiter, RateLimiterConfig::default());
    }
}
