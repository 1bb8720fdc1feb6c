//! Rate-limited delay queue feeding the controller workers.
//!
//! Semantics:
//! - a key is pending at most once (re-adds of a pending key are merged)
//! - a key handed out by [`RateLimitingQueue::get`] is *processing* until
//!   [`RateLimitingQueue::done`]; re-adds while processing are deferred to
//!   `done`, so no key is ever held by two workers at once
//! - delayed adds become pending once their deadline passes; `get` watches
//!   the earliest deadline itself, no background task is involved
//! - after [`RateLimitingQueue::shutdown`] new adds are ignored, already
//!   pending keys are still handed out, then `get` returns `None`

mod rate_limiter;

pub use rate_limiter::{
    default_controller_rate_limiter, ItemExponentialRateLimiter, MaxOfRateLimiter, RateLimiter,
    TokenBucketRateLimiter,
};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A key waiting for its delay to elapse.
struct Waiting<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Waiting<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Waiting<K> {}

impl<K> PartialOrd for Waiting<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Waiting<K> {
    // Reversed: BinaryHeap is a max-heap and the earliest deadline must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: BinaryHeap<Waiting<K>>,
    /// Earliest deadline per waiting key; heap entries that disagree are stale.
    waiting_deadlines: HashMap<K, Instant>,
    seq: u64,
    shutting_down: bool,
}

impl<K> QueueState<K>
where
    K: Eq + Hash + Clone,
{
    /// Returns true if the key was appended to the ready queue.
    fn insert(&mut self, key: K) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Returns true if this is now the earliest deadline for the key.
    fn insert_waiting(&mut self, key: K, ready_at: Instant) -> bool {
        if let Some(existing) = self.waiting_deadlines.get(&key) {
            if *existing <= ready_at {
                return false;
            }
        }
        self.seq = self.seq.wrapping_add(1);
        self.waiting_deadlines.insert(key.clone(), ready_at);
        self.waiting.push(Waiting {
            ready_at,
            seq: self.seq,
            key,
        });
        true
    }

    fn promote_ready(&mut self, now: Instant) {
        while let Some(top) = self.waiting.peek() {
            if top.ready_at > now {
                break;
            }
            let Some(entry) = self.waiting.pop() else {
                break;
            };
            if self.waiting_deadlines.get(&entry.key) != Some(&entry.ready_at) {
                continue;
            }
            self.waiting_deadlines.remove(&entry.key);
            self.insert(entry.key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|w| w.ready_at)
    }
}

/// Work queue with deduplication, a processing set, delayed adds and a
/// pluggable [`RateLimiter`].
pub struct RateLimitingQueue<K> {
    state: Mutex<QueueState<K>>,
    limiter: Box<dyn RateLimiter<K>>,
    notify: Notify,
}

impl<K> RateLimitingQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: BinaryHeap::new(),
                waiting_deadlines: HashMap::new(),
                seq: 0,
                shutting_down: false,
            }),
            limiter,
            notify: Notify::new(),
        }
    }

    /// Make `key` pending now.
    pub fn add(&self, key: K) {
        let queued = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.insert(key)
        };
        if queued {
            self.notify.notify_one();
        }
    }

    /// Make `key` pending once `delay` has elapsed. An earlier pending
    /// deadline for the same key wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let ready_at = Instant::now() + delay;
        let earliest = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.insert_waiting(key, ready_at)
        };
        if earliest {
            // Sleeping getters must recompute their deadline.
            self.notify.notify_waiters();
        }
    }

    /// Requeue `key` after the rate limiter's delay, returning that delay.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.limiter.when(&key);
        self.add_after(key, delay);
        delay
    }

    /// Ask the rate limiter for the next delay of `key` without requeueing.
    /// Counts as a requeue.
    pub fn when(&self, key: &K) -> Duration {
        self.limiter.when(key)
    }

    /// Wait for the next pending key. `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                state.promote_ready(Instant::now());

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }

                if state.shutting_down {
                    return None;
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark `key` as no longer processing. A re-add that arrived meanwhile
    /// becomes pending now.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Reset rate limiting for `key`.
    pub fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Number of pending keys (delayed keys are not counted).
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys waiting for a delay to elapse.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting_deadlines.len()
    }

    /// Number of keys currently held by workers.
    pub fn processing_len(&self) -> usize {
        self.state.lock().processing.len()
    }

    /// Stop accepting keys and wake every blocked getter. Delayed keys
    /// are discarded.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.waiting.clear();
            state.waiting_deadlines.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
