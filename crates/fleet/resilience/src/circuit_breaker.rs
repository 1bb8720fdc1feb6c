//! Circuit breaker pattern for resilience.
//!
//! Stops attempting an operation after repeated failure and periodically
//! lets probes through to detect recovery. The breaker is generic: the
//! owner decides what it guards and must call [`CircuitBreaker::allow`]
//! before attempting and `record_success` / `record_failure` after.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{BreakerError, ResilienceResult};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, attempts flow normally.
    Closed,

    /// Circuit is open, attempts are rejected.
    Open,

    /// Circuit is probing whether the operation recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state transition, delivered to the configured listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Listener invoked off the transition path for every state change.
pub type StateChangeListener = Arc<dyn Fn(StateChange) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    last_transition: DateTime<Utc>,
}

/// Circuit breaker guarding one class of operation.
///
/// Transitions:
/// - Closed: every attempt allowed; `max_failures` consecutive failures open it
/// - Open: attempts rejected until `timeout` has passed since the last failure;
///   the next `allow` then moves to half-open and admits the caller
/// - HalfOpen: every attempt allowed; `success_threshold` successes close it,
///   any failure re-opens it
///
/// Half-open admits concurrent probes without limit. Callers that need a
/// single probe must rate-limit themselves.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    notifications: TaskTracker,
}

impl CircuitBreaker {
    /// Create a breaker, rejecting invalid configuration up front.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ResilienceResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config))
    }

    pub(crate) fn from_validated(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                last_transition: Utc::now(),
            }),
            notifications: TaskTracker::new(),
        }
    }

    /// Operation class this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Never transitions by itself.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Check whether an attempt may proceed.
    ///
    /// In the open state this is also where the timeout-driven move to
    /// half-open happens.
    pub fn allow(&self) -> bool {
        let change = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let cooled_down = inner
                        .last_failure
                        .map(|at| at.elapsed() >= self.config.timeout)
                        .unwrap_or(true);
                    if !cooled_down {
                        return false;
                    }

                    info!(
                        breaker = %self.name,
                        "Circuit breaker transitioning to half-open after timeout"
                    );
                    self.transition_to(&mut inner, CircuitState::HalfOpen)
                }
            }
        };

        self.notify(change);
        true
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let change = {
            let mut inner = self.inner.lock();
            inner.failures = 0;

            match inner.state {
                CircuitState::HalfOpen => {
                    inner.successes = inner.successes.saturating_add(1);

                    if inner.successes >= self.config.success_threshold {
                        info!(
                            breaker = %self.name,
                            successes = inner.successes,
                            "Circuit breaker closing after successful recovery"
                        );
                        self.transition_to(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Closed => None,
                CircuitState::Open => {
                    debug!(breaker = %self.name, "Success recorded while circuit open");
                    None
                }
            }
        };

        self.notify(change);
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let change = {
            let mut inner = self.inner.lock();
            inner.failures = inner.failures.saturating_add(1);
            inner.last_failure = Some(Instant::now());

            match inner.state {
                CircuitState::Closed if inner.failures >= self.config.max_failures => {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "Circuit breaker opening due to failures"
                    );
                    self.transition_to(&mut inner, CircuitState::Open)
                }
                CircuitState::HalfOpen => {
                    warn!(
                        breaker = %self.name,
                        "Circuit breaker re-opening after half-open failure"
                    );
                    self.transition_to(&mut inner, CircuitState::Open)
                }
                _ => None,
            }
        };

        self.notify(change);
    }

    /// Force the breaker closed with all counters zeroed.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.inner.lock();
            let change = self.transition_to(&mut inner, CircuitState::Closed);
            inner.failures = 0;
            inner.successes = 0;
            inner.last_failure = None;
            change
        };

        if change.is_some() {
            info!(breaker = %self.name, "Circuit breaker reset");
        }
        self.notify(change);
    }

    /// Run `operation` if the breaker admits it, recording the outcome.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(BreakerError::Open {
                breaker: self.name.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            last_transition: inner.last_transition,
        }
    }

    /// Wait for every listener notification dispatched so far. Outside a
    /// runtime listeners run inline, so there is never anything to wait for.
    pub async fn drain_notifications(&self) {
        self.notifications.close();
        self.notifications.wait().await;
        self.notifications.reopen();
    }

    /// Move to `new_state`, resetting counters. Returns the change to
    /// publish once the lock is released, or `None` for a self-transition.
    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) -> Option<StateChange> {
        let from = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.successes = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.successes = 0;
            }
        }

        if from == new_state {
            return None;
        }

        let at = Utc::now();
        inner.last_transition = at;

        Some(StateChange {
            breaker: self.name.clone(),
            from,
            to: new_state,
            at,
        })
    }

    fn notify(&self, change: Option<StateChange>) {
        let (Some(change), Some(listener)) = (change, self.config.on_state_change.clone()) else {
            return;
        };

        // Without a runtime there is nothing to track the task on, so the
        // listener runs inline. The state lock is already released here.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(
                    self.notifications
                        .track_future(async move { listener(change) }),
                );
            }
            Err(_) => listener(change),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Operation class.
    pub name: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures since the last success.
    pub failure_count: u32,

    /// Successes recorded in the current half-open period.
    pub success_count: u32,

    /// Time of last state transition.
    pub last_transition: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(100),
            on_state_change: None,
        }
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            breaker.record_failure();
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = CircuitBreakerConfig {
            max_failures: 0,
            ..test_config()
        };
        assert!(CircuitBreaker::new("remote-api", config).is_err());
    }

    #[test]
    fn test_circuit_breaker_closed_to_open() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_after_timeout() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();
        trip(&breaker);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!breaker.allow());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Half-open keeps admitting probes.
        assert!(breaker.allow());
        assert!(breaker.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_extends_timeout() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();
        trip(&breaker);

        tokio::time::advance(Duration::from_millis(80)).await;
        breaker.record_failure();

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(!breaker.allow());

        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(breaker.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_to_closed() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();
        trip(&breaker);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(breaker.allow());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();
        trip(&breaker);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(breaker.allow());

        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().success_count, 0);
        assert!(!breaker.allow());
    }

    #[tokio::test]
    async fn test_reset_notifies_listener_once() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let counter = transitions.clone();
        let listener: StateChangeListener = Arc::new(move |_change| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let breaker =
            CircuitBreaker::new("remote-api", test_config().with_listener(listener)).unwrap();
        trip(&breaker);
        breaker.reset();
        breaker.reset();
        breaker.drain_notifications().await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
        // closed -> open, open -> closed; the second reset is a no-op.
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_runs_inline_outside_runtime() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let counter = transitions.clone();
        let listener: StateChangeListener = Arc::new(move |_change| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let breaker =
            CircuitBreaker::new("remote-api", test_config().with_listener(listener)).unwrap();
        trip(&breaker);

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let breaker = CircuitBreaker::new("remote-api", test_config()).unwrap();

        for _ in 0..3 {
            let result: Result<(), BreakerError<&str>> =
                breaker.execute(|| async { Err("connection refused") }).await;
            assert!(matches!(result, Err(BreakerError::Operation(_))));
        }

        let rejected: Result<(), BreakerError<&str>> = breaker.execute(|| async { Ok(()) }).await;
        assert!(rejected.unwrap_err().is_open());
    }
}
