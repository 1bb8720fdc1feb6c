//! Immutable retry policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::classifier::ErrorClassifier;
use crate::error::{ResilienceError, ResilienceResult};

/// Backoff parameters and error classifiers. Built once, never mutated.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    classifiers: Vec<Arc<dyn ErrorClassifier>>,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Classifiers in evaluation order.
    pub fn classifiers(&self) -> &[Arc<dyn ErrorClassifier>] {
        &self.classifiers
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            classifiers: Vec::new(),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classifiers: Vec<_> = self.classifiers.iter().map(|c| c.name()).collect();
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("classifiers", &classifiers)
            .finish()
    }
}

/// Builder for [`RetryPolicy`]; `build` validates.
#[derive(Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.policy.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.policy.max_delay = max_delay;
        self
    }

    pub fn backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.policy.backoff_factor = backoff_factor;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Append a classifier. Order matters for backoff overrides.
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.policy.classifiers.push(Arc::new(classifier));
        self
    }

    pub fn shared_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.policy.classifiers.push(classifier);
        self
    }

    pub fn build(self) -> ResilienceResult<RetryPolicy> {
        let policy = self.policy;

        if policy.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "retry max_attempts must be > 0".to_string(),
            ));
        }
        if policy.base_delay.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "retry base_delay must be > 0".to_string(),
            ));
        }
        if policy.max_delay < policy.base_delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "retry max_delay ({:?}) must be >= base_delay ({:?})",
                policy.max_delay, policy.base_delay
            )));
        }
        if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "retry backoff_factor must be >= 1, got {}",
                policy.backoff_factor
            )));
        }

        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NetworkErrorClassifier;

    #[test]
    fn test_builder_validates() {
        assert!(RetryPolicy::builder().build().is_ok());
        assert!(RetryPolicy::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicy::builder().base_delay(Duration::ZERO).build().is_err());
        assert!(RetryPolicy::builder().backoff_factor(0.5).build().is_err());
        assert!(RetryPolicy::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_keeps_classifier_order() {
        let policy = RetryPolicy::builder()
            .classifier(NetworkErrorClassifier::new())
            .classifier(crate::retry::ConflictErrorClassifier::new())
            .build()
            .unwrap();

        let names: Vec<_> = policy.classifiers().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["network", "conflict"]);
    }
}
