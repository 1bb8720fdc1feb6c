//! Per-operation-class circuit breakers.

use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::config::CircuitBreakerConfig;
use crate::error::ResilienceResult;

/// Hands out one shared breaker per operation class (e.g. one per remote
/// cluster API endpoint), creating it on first use.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers all share `config`.
    pub fn new(config: CircuitBreakerConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breakers: DashMap::new(),
        })
    }

    /// Get or create the breaker for an operation class.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(operation) {
            return existing.clone();
        }

        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::from_validated(
                    operation.to_string(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Reset a breaker if it exists.
    pub fn reset(&self, operation: &str) {
        if let Some(breaker) = self.breakers.get(operation) {
            breaker.reset();
        }
    }

    /// Stop tracking an operation class.
    pub fn remove(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(operation).map(|(_, b)| b)
    }

    /// Statistics for every tracked breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Wait for the pending listener notifications of every breaker.
    pub async fn drain_notifications(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| b.value().clone()).collect();
        for breaker in breakers {
            breaker.drain_notifications().await;
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitState, StateChangeListener};
    use parking_lot::Mutex;

    #[test]
    fn test_breaker_is_shared_per_operation() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            max_failures: 1,
            ..Default::default()
        })
        .unwrap();

        let east = registry.breaker("clusters/east");
        east.record_failure();

        assert_eq!(registry.breaker("clusters/east").state(), CircuitState::Open);
        assert_eq!(registry.breaker("clusters/west").state(), CircuitState::Closed);
        assert_eq!(registry.len(), 2);

        registry.reset("clusters/east");
        assert_eq!(east.state(), CircuitState::Closed);

        let names: Vec<_> = registry.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["clusters/east", "clusters/west"]);
    }

    #[tokio::test]
    async fn test_drain_waits_for_every_breaker_listener() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        let listener: StateChangeListener = Arc::new(move |change| {
            seen.lock().push((change.breaker, change.to));
        });
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig {
                max_failures: 1,
                ..Default::default()
            }
            .with_listener(listener),
        )
        .unwrap();

        registry.breaker("clusters/east").record_failure();
        registry.breaker("clusters/west").record_failure();
        registry.drain_notifications().await;

        let mut changes = changes.lock().clone();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            changes,
            vec![
                ("clusters/east".to_string(), CircuitState::Open),
                ("clusters/west".to_string(), CircuitState::Open),
            ]
        );
    }
}
