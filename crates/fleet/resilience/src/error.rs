//! Error types for fleet-resilience crate.

use thiserror::Error;

/// Errors raised while building resilience primitives.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for resilience construction.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Outcome of an operation guarded by a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the attempt without running it.
    #[error("circuit breaker {breaker} is open")]
    Open { breaker: String },

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Terminal outcome of [`crate::RetryManager::retry_with_backoff`].
///
/// Cancellation and deadline expiry are reported separately from the last
/// business error so callers can tell "gave up waiting" apart from
/// "ran out of attempts".
#[derive(Debug, Error)]
pub enum RetryError {
    /// The error was not retryable under the policy.
    #[error("non-retryable error after {attempts} attempt(s): {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// All attempts were used up.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The caller cancelled while an attempt or backoff was pending.
    #[error("retry cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        last_error: Option<String>,
    },

    /// The deadline passed while an attempt or backoff was pending.
    #[error("retry deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        attempts: u32,
        last_error: Option<String>,
    },
}

impl RetryError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    /// Whether the retry loop stopped because of cancellation or a deadline.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            RetryError::Cancelled { .. } | RetryError::DeadlineExceeded { .. }
        )
    }

    /// Rendered text of the last business error, if any attempt failed.
    pub fn last_error(&self) -> Option<String> {
        match self {
            RetryError::Permanent { source, .. } | RetryError::Exhausted { source, .. } => {
                Some(format!("{source:#}"))
            }
            RetryError::Cancelled { last_error, .. }
            | RetryError::DeadlineExceeded { last_error, .. } => last_error.clone(),
        }
    }
}
