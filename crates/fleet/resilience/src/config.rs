//! Resilience configuration.
//!
//! Circuit breaker settings and the serde-friendly form of a retry policy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::StateChangeListener;
use crate::error::{ResilienceError, ResilienceResult};
use crate::retry::{
    ConflictErrorClassifier, NetworkErrorClassifier, RetryPolicy, SubstringClassifier,
};

/// Circuit breaker configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,

    /// Time to wait after the last failure before probing again.
    pub timeout: Duration,

    /// Successes in half-open needed to close the circuit.
    pub success_threshold: u32,

    /// Invoked asynchronously on every state change.
    #[serde(skip)]
    pub on_state_change: Option<StateChangeListener>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
            on_state_change: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("max_failures", &self.max_failures)
            .field("timeout", &self.timeout)
            .field("success_threshold", &self.success_threshold)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

impl CircuitBreakerConfig {
    /// Attach a state-change listener.
    pub fn with_listener(mut self, listener: StateChangeListener) -> Self {
        self.on_state_change = Some(listener);
        self
    }

    /// Reject configurations the state machine cannot honour.
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_failures == 0 {
            return Err(ResilienceError::InvalidConfig(
                "circuit breaker max_failures must be > 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "circuit breaker timeout must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "circuit breaker success_threshold must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable description of one error classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierConfig {
    /// Connection refused / reset / timeouts / EOF / broken pipe / unreachable.
    Network {
        #[serde(default)]
        backoff_ms: Option<u64>,
    },

    /// Optimistic-concurrency conflicts and stale resource versions.
    Conflict {
        #[serde(default)]
        backoff_ms: Option<u64>,
    },

    /// Custom substring match on the error chain text.
    Substring {
        name: String,
        patterns: Vec<String>,
        #[serde(default)]
        backoff_ms: Option<u64>,
    },
}

/// Serializable retry policy, converted with [`RetryPolicyConfig::into_policy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Evaluated in order. Empty means every error is retryable.
    #[serde(default)]
    pub classifiers: Vec<ClassifierConfig>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: true,
            classifiers: Vec::new(),
        }
    }
}

impl RetryPolicyConfig {
    /// Build and validate the runtime policy.
    pub fn into_policy(self) -> ResilienceResult<RetryPolicy> {
        let mut builder = RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_factor(self.backoff_factor)
            .jitter(self.jitter);

        for classifier in self.classifiers {
            builder = match classifier {
                ClassifierConfig::Network { backoff_ms } => {
                    let mut c = NetworkErrorClassifier::new();
                    if let Some(ms) = backoff_ms {
                        c = c.with_backoff(Duration::from_millis(ms));
                    }
                    builder.classifier(c)
                }
                ClassifierConfig::Conflict { backoff_ms } => {
                    let mut c = ConflictErrorClassifier::new();
                    if let Some(ms) = backoff_ms {
                        c = c.with_backoff(Duration::from_millis(ms));
                    }
                    builder.classifier(c)
                }
                ClassifierConfig::Substring {
                    name,
                    patterns,
                    backoff_ms,
                } => {
                    let mut c = SubstringClassifier::new(name, patterns);
                    if let Some(ms) = backoff_ms {
                        c = c.with_backoff(Duration::from_millis(ms));
                    }
                    builder.classifier(c)
                }
            };
        }

        builder.build()
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let zero_failures = CircuitBreakerConfig {
            max_failures: 0,
            ..Default::default()
        };
        assert!(zero_failures.validate().is_err());

        let zero_timeout = CircuitBreakerConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let zero_successes = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(zero_successes.validate().is_err());
    }

    #[test]
    fn test_retry_config_from_json() {
        let json = r#"{
            "max_attempts": 4,
            "base_delay_ms": 50,
            "jitter": false,
            "classifiers": [
                {"kind": "network", "backoff_ms": 2000},
                {"kind": "conflict"},
                {"kind": "substring", "name": "throttle", "patterns": ["too many requests"]}
            ]
        }"#;

        let config: RetryPolicyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.classifiers.len(), 3);

        let policy = config.into_policy().unwrap();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay(), Duration::from_millis(50));
        assert!(!policy.jitter());
        assert_eq!(policy.classifiers().len(), 3);
    }

    #[test]
    fn test_retry_config_rejects_bad_delays() {
        let config = RetryPolicyConfig {
            base_delay_ms: 500,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(config.into_policy().is_err());
    }
}
