//! Queue-side rate limiters.
//!
//! A rate limiter answers "how long should this item wait before it is
//! processed again" and counts how often it has asked for each item.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Computes requeue delays for items.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay before `item` may be processed again. Each call counts as one
    /// requeue of `item`.
    fn when(&self, item: &K) -> Duration;

    /// Stop tracking `item`, resetting its requeue count.
    fn forget(&self, item: &K);

    /// How many times `item` has been requeued since it was last forgotten.
    fn num_requeues(&self, item: &K) -> u32;
}

/// Per-item exponential backoff: `base * 2^requeues`, capped at `max`.
pub struct ItemExponentialRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialRateLimiter<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RateLimiter<K> for ItemExponentialRateLimiter<K>
where
    K: Eq + Hash + Clone + Send,
{
    fn when(&self, item: &K) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(item.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };

        let backoff = self.base.as_secs_f64() * 2f64.powi(exponent.min(1_024) as i32);
        if !backoff.is_finite() || backoff > self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(backoff).unwrap_or(self.max)
    }

    fn forget(&self, item: &K) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by all items: `qps` refill rate, `burst`
/// capacity. Does not track individual items.
pub struct TokenBucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Take one token, returning how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }
}

impl<K> RateLimiter<K> for TokenBucketRateLimiter {
    fn when(&self, _item: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _item: &K) {}

    fn num_requeues(&self, _item: &K) -> u32 {
        0
    }
}

/// Worst case of several limiters.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &K) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// Per-item exponential backoff from `base` to `max`, combined with an
/// overall token bucket.
pub fn default_controller_rate_limiter<K>(
    base: Duration,
    max: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialRateLimiter::new(base, max)),
        Box::new(TokenBucketRateLimiter::new(qps, burst)),
    ])
}
