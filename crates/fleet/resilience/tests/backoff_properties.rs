//! Property tests: backoff delays are bounded and monotonic, and the
//! circuit breaker never leaves its state machine.

use std::time::Duration;

use anyhow::anyhow;
use fleet_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryManager, RetryPolicy};
use fleet_types::{WorkItem, WorkspaceKey};
use proptest::prelude::*;

fn item_with_attempts(attempts: u32) -> WorkItem {
    let mut item = WorkItem::new(WorkspaceKey::new("ws", "cluster").unwrap());
    item.attempts = attempts;
    item
}

fn arb_policy(jitter: bool) -> impl Strategy<Value = RetryPolicy> {
    (1u64..1_000, 1u64..100, 1.0f64..4.0).prop_map(move |(base_ms, spread, factor)| {
        RetryPolicy::builder()
            .max_attempts(50)
            .base_delay(Duration::from_millis(base_ms))
            .max_delay(Duration::from_millis(base_ms * spread))
            .backoff_factor(factor)
            .jitter(jitter)
            .build()
            .unwrap()
    })
}

#[derive(Debug, Clone, Copy)]
enum BreakerOp {
    Allow,
    Success,
    Failure,
    Reset,
}

fn arb_breaker_op() -> impl Strategy<Value = BreakerOp> {
    prop_oneof![
        Just(BreakerOp::Allow),
        Just(BreakerOp::Success),
        Just(BreakerOp::Failure),
        Just(BreakerOp::Reset),
    ]
}

proptest! {
    #[test]
    fn delay_is_monotonic_without_jitter(policy in arb_policy(false), attempts in 0u32..60) {
        let manager = RetryManager::new(policy);
        let err = anyhow!("boom");

        let current = manager.retry_delay(&item_with_attempts(attempts), err.as_ref());
        let next = manager.retry_delay(&item_with_attempts(attempts + 1), err.as_ref());
        prop_assert!(current <= next);
    }

    #[test]
    fn delay_stays_within_policy_bounds(policy in arb_policy(true), attempts in 0u32..1_000) {
        let base = policy.base_delay();
        let max = policy.max_delay();
        let manager = RetryManager::new(policy);

        let delay = manager.retry_delay(&item_with_attempts(attempts), anyhow!("boom").as_ref());
        prop_assert!(delay >= base);
        prop_assert!(delay <= max);
    }

    #[test]
    fn closed_breaker_opens_only_after_max_failures(
        max_failures in 1u32..10,
        ops in prop::collection::vec(arb_breaker_op(), 0..64),
    ) {
        let config = CircuitBreakerConfig {
            max_failures,
            timeout: Duration::from_secs(3600),
            success_threshold: 1,
            on_state_change: None,
        };
        let breaker = CircuitBreaker::new("prop", config).unwrap();
        let mut consecutive = 0u32;

        for op in ops {
            let before = breaker.state();
            match op {
                BreakerOp::Allow => {
                    let allowed = breaker.allow();
                    prop_assert_eq!(allowed, before != CircuitState::Open);
                }
                BreakerOp::Success => {
                    breaker.record_success();
                    consecutive = 0;
                }
                BreakerOp::Failure => {
                    breaker.record_failure();
                    consecutive += 1;
                    if before == CircuitState::Closed {
                        prop_assert_eq!(
                            breaker.state() == CircuitState::Open,
                            consecutive >= max_failures
                        );
                    }
                }
                BreakerOp::Reset => {
                    breaker.reset();
                    consecutive = 0;
                    prop_assert_eq!(breaker.state(), CircuitState::Closed);
                }
            }
        }
    }
}
