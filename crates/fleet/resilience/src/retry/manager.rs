//! Retry decisions and the backoff loop.

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use fleet_types::WorkItem;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::policy::RetryPolicy;
use crate::error::RetryError;

/// Maximum relative jitter applied to a computed delay.
const JITTER_RATIO: f64 = 0.25;

/// Cancellation and deadline for a retry loop.
#[derive(Debug, Clone)]
pub struct RetryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RetryContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

enum Interrupt {
    Cancelled,
    Deadline,
}

/// Applies a [`RetryPolicy`] to work items.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether the error class is retryable at all, ignoring attempt counts.
    ///
    /// With no classifiers configured every error is retryable.
    pub fn is_retryable(&self, error: &(dyn Error + 'static)) -> bool {
        let classifiers = self.policy.classifiers();
        classifiers.is_empty() || classifiers.iter().any(|c| c.matches(error))
    }

    /// Whether `item` should be attempted again after `error`.
    pub fn should_retry(&self, item: &WorkItem, error: &(dyn Error + 'static)) -> bool {
        if item.attempts >= self.policy.max_attempts() {
            return false;
        }
        self.is_retryable(error)
    }

    /// Delay before the next attempt of `item`.
    ///
    /// The first matching classifier with a backoff override wins; otherwise
    /// the delay is exponential in the attempt count, optionally jittered,
    /// and clamped to `[base_delay, max_delay]`.
    pub fn retry_delay(&self, item: &WorkItem, error: &(dyn Error + 'static)) -> Duration {
        if let Some(delay) = self.backoff_override(error) {
            return delay;
        }

        let delay = self.exponential_delay(item.attempts);
        if self.policy.jitter() {
            self.jittered(delay)
        } else {
            delay
        }
    }

    /// Fixed delay of the first matching classifier that carries one.
    pub fn backoff_override(&self, error: &(dyn Error + 'static)) -> Option<Duration> {
        self.policy
            .classifiers()
            .iter()
            .filter(|c| c.matches(error))
            .find_map(|c| c.backoff_override())
    }

    /// Un-jittered backoff for a given attempt count.
    pub fn exponential_delay(&self, attempts: u32) -> Duration {
        let base = self.policy.base_delay().as_secs_f64();
        let max = self.policy.max_delay().as_secs_f64();

        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = base * self.policy.backoff_factor().powi(exponent);

        self.clamp(raw, base, max)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let base = self.policy.base_delay().as_secs_f64();
        let max = self.policy.max_delay().as_secs_f64();

        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        self.clamp(delay.as_secs_f64() * factor, base, max)
    }

    fn clamp(&self, secs: f64, base: f64, max: f64) -> Duration {
        let secs = if secs.is_finite() { secs.clamp(base, max) } else { max };
        Duration::try_from_secs_f64(secs).unwrap_or(self.policy.max_delay())
    }

    /// Drive `processor` until it succeeds, fails permanently, runs out of
    /// attempts, or `ctx` is cancelled / past its deadline.
    ///
    /// `item.attempts` and `item.last_attempt_at` are stamped before each
    /// call; the processor receives a snapshot of the item.
    #[instrument(skip(self, ctx, item, processor), fields(key = %item.key))]
    pub async fn retry_with_backoff<F, Fut>(
        &self,
        ctx: &RetryContext,
        item: &mut WorkItem,
        mut processor: F,
    ) -> Result<(), RetryError>
    where
        F: FnMut(WorkItem) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            if item.attempts >= self.policy.max_attempts() {
                let source = last_error.unwrap_or_else(|| {
                    anyhow::anyhow!("retry budget already spent before first attempt")
                });
                return Err(RetryError::Exhausted {
                    attempts: item.attempts,
                    source,
                });
            }

            if ctx.cancel.is_cancelled() {
                return Err(self.interrupted(Interrupt::Cancelled, item));
            }
            if ctx.deadline_passed() {
                return Err(self.interrupted(Interrupt::Deadline, item));
            }

            item.begin_attempt();

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(self.interrupted(Interrupt::Cancelled, item));
                }
                _ = ctx.deadline_elapsed() => {
                    return Err(self.interrupted(Interrupt::Deadline, item));
                }
                result = processor(item.clone()) => result,
            };

            let error = match outcome {
                Ok(()) => {
                    item.last_error = None;
                    return Ok(());
                }
                Err(error) => error,
            };

            item.record_error(format!("{error:#}"));

            if !self.is_retryable(error.as_ref()) {
                warn!(attempts = item.attempts, error = %format!("{error:#}"), "Non-retryable error");
                return Err(RetryError::Permanent {
                    attempts: item.attempts,
                    source: error,
                });
            }

            if !self.should_retry(item, error.as_ref()) {
                warn!(attempts = item.attempts, error = %format!("{error:#}"), "Retry attempts exhausted");
                return Err(RetryError::Exhausted {
                    attempts: item.attempts,
                    source: error,
                });
            }

            let delay = self.retry_delay(item, error.as_ref());
            debug!(
                attempts = item.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{error:#}"),
                "Retrying after backoff"
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(self.interrupted(Interrupt::Cancelled, item));
                }
                _ = ctx.deadline_elapsed() => {
                    return Err(self.interrupted(Interrupt::Deadline, item));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn interrupted(&self, interrupt: Interrupt, item: &WorkItem) -> RetryError {
        let attempts = item.attempts;
        let last_error = item.last_error.clone();
        match interrupt {
            Interrupt::Cancelled => RetryError::Cancelled {
                attempts,
                last_error,
            },
            Interrupt::Deadline => RetryError::DeadlineExceeded {
                attempts,
                last_error,
            },
        }
    }
}
