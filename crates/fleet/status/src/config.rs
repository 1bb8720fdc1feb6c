//! Aggregation configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{StatusError, StatusResult};

/// Thresholds and critical condition types for status aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Fraction of `True` reports (per condition type) required to call the
    /// type healthy. Must be in `(0, 1]`.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: f64,

    /// Condition types whose failure fails the cluster regardless of which
    /// component reported them.
    #[serde(default)]
    pub critical_condition_types: BTreeSet<String>,
}

fn default_healthy_threshold() -> f64 {
    0.8
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: default_healthy_threshold(),
            critical_condition_types: BTreeSet::new(),
        }
    }
}

impl AggregatorConfig {
    /// Add a critical condition type.
    pub fn with_critical_type(mut self, condition_type: impl Into<String>) -> Self {
        self.critical_condition_types.insert(condition_type.into());
        self
    }

    pub fn is_critical_type(&self, condition_type: &str) -> bool {
        self.critical_condition_types.contains(condition_type)
    }

    pub fn validate(&self) -> StatusResult<()> {
        let t = self.healthy_threshold;
        if !t.is_finite() || t <= 0.0 || t > 1.0 {
            return Err(StatusError::InvalidConfig(format!(
                "healthy_threshold must be in (0, 1], got {t}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.healthy_threshold, 0.8);
        assert!(config.critical_condition_types.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        for bad in [0.0, -0.1, 1.01, f64::NAN] {
            let config = AggregatorConfig {
                healthy_threshold: bad,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad} accepted");
        }

        let config = AggregatorConfig {
            healthy_threshold: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"critical_condition_types": ["Connection"]}"#).unwrap();
        assert_eq!(config.healthy_threshold, 0.8);
        assert!(config.is_critical_type("Connection"));
        assert!(!config.is_critical_type("Registration"));
    }
}
