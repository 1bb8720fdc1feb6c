//! The controller loop.
//!
//! A fixed pool of workers pulls workspace-scoped keys from one
//! [`RateLimitingQueue`] and hands them to a [`Reconciler`]. Failures are
//! turned into requeue-or-drop decisions; a drop marks the controller
//! unhealthy until a grace period passes or a later reconcile succeeds.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use dashmap::DashMap;
use fleet_resilience::{CircuitBreaker, RetryManager};
use fleet_types::{WorkItem, WorkspaceKey};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::metrics::{MetricsSink, NoOpMetrics, ReconcileOutcome};
use crate::queue::{RateLimiter, RateLimitingQueue};
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::traits::{Enqueuer, HealthReporter, ReconcileContext, Reconciler};
use crate::workspace::{WorkspaceGuard, WorkspaceScoped};

/// Snapshot of controller counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub name: String,

    /// Keys reconciled successfully.
    pub processed: u64,

    /// Failed reconcile attempts.
    pub errors: u64,

    /// Keys given up on.
    pub dropped: u64,

    /// Keys or objects rejected by workspace isolation.
    pub denied: u64,

    /// Keys ready to be processed.
    pub queue_depth: usize,

    /// Keys waiting for a requeue delay.
    pub waiting: usize,

    pub healthy: bool,
}

#[derive(Debug, Default)]
struct HealthState {
    started: bool,
    stopping: bool,
    error_dropped: bool,
    /// Bumped on every drop and recovery so stale timers do nothing.
    drop_epoch: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    denied: AtomicU64,
}

/// Builder for [`Controller`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    reconciler: Arc<dyn Reconciler>,
    metrics: Arc<dyn MetricsSink>,
    error_sink: Arc<dyn ErrorSink>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryManager>,
    rate_limiter: Option<Box<dyn RateLimiter<WorkspaceKey>>>,
}

impl ControllerBuilder {
    pub fn new(config: ControllerConfig, reconciler: Arc<dyn Reconciler>) -> Self {
        Self {
            config,
            reconciler,
            metrics: Arc::new(NoOpMetrics),
            error_sink: Arc::new(TracingErrorSink),
            breaker: None,
            retry: None,
            rate_limiter: None,
        }
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Gate every attempt on this breaker.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Classify reconcile errors: unmatched errors are dropped at once and
    /// classifier backoff overrides replace the rate limiter delay.
    pub fn retry_manager(mut self, retry: RetryManager) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Replace the limiter built from `config.rate_limiter`.
    pub fn rate_limiter(mut self, limiter: impl RateLimiter<WorkspaceKey> + 'static) -> Self {
        self.rate_limiter = Some(Box::new(limiter));
        self
    }

    pub fn build(self) -> ControllerResult<Arc<Controller>> {
        self.config.validate()?;

        let limiter: Box<dyn RateLimiter<WorkspaceKey>> = match self.rate_limiter {
            Some(limiter) => limiter,
            None => Box::new(self.config.rate_limiter.build::<WorkspaceKey>()?),
        };
        let guard = WorkspaceGuard::new(
            self.config.name.clone(),
            self.config.allowed_workspaces.iter().cloned(),
        );

        Ok(Arc::new(Controller {
            config: self.config,
            reconciler: self.reconciler,
            queue: RateLimitingQueue::new(limiter),
            guard,
            breaker: self.breaker,
            retry: self.retry,
            metrics: self.metrics,
            error_sink: self.error_sink,
            work_items: DashMap::new(),
            health: Mutex::new(HealthState::default()),
            counters: Counters::default(),
            timers: TaskTracker::new(),
            stop: CancellationToken::new(),
        }))
    }
}

/// Generic reconcile loop over workspace-scoped keys.
pub struct Controller {
    config: ControllerConfig,
    reconciler: Arc<dyn Reconciler>,
    queue: RateLimitingQueue<WorkspaceKey>,
    guard: WorkspaceGuard,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryManager>,
    metrics: Arc<dyn MetricsSink>,
    error_sink: Arc<dyn ErrorSink>,
    work_items: DashMap<WorkspaceKey, WorkItem>,
    health: Mutex<HealthState>,
    counters: Counters,
    timers: TaskTracker,
    stop: CancellationToken,
}

impl Controller {
    pub fn builder(config: ControllerConfig, reconciler: Arc<dyn Reconciler>) -> ControllerBuilder {
        ControllerBuilder::new(config, reconciler)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Workspace allow-set; may be changed while running.
    pub fn workspaces(&self) -> &WorkspaceGuard {
        &self.guard
    }

    /// Run the worker pool until `cancel` fires or [`Controller::shutdown`]
    /// is called, then give in-flight keys up to `shutdown_timeout` to
    /// finish and join pending health timers.
    #[instrument(skip(self, cancel), fields(controller = %self.config.name))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> ControllerResult<()> {
        {
            let mut health = self.health.lock();
            if health.started {
                return Err(ControllerError::AlreadyStarted(self.config.name.clone()));
            }
            if health.stopping {
                return Err(ControllerError::ShuttingDown(self.config.name.clone()));
            }
            health.started = true;
        }

        info!(workers = self.config.worker_count, "Controller started");

        let workers = TaskTracker::new();
        for worker in 0..self.config.worker_count {
            let controller = Arc::clone(&self);
            workers.spawn(async move { controller.worker_loop(worker).await });
        }
        workers.close();

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.stop.cancelled() => {}
            _ = workers.wait() => {}
        }

        self.begin_shutdown();

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, workers.wait()).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Workers still busy after shutdown timeout"
            );
        }

        self.timers.close();
        self.timers.wait().await;

        info!("Controller stopped");
        Ok(())
    }

    /// Stop admitting work and wake idle workers. In-flight keys finish.
    pub fn shutdown(&self) {
        info!(controller = %self.config.name, "Controller shutdown requested");
        self.begin_shutdown();
    }

    fn begin_shutdown(&self) {
        self.health.lock().stopping = true;
        self.stop.cancel();
        self.queue.shutdown();
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(controller = %self.config.name, worker, "Worker started");

        loop {
            let key = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                key = self.queue.get() => key,
            };
            let Some(key) = key else {
                break;
            };
            self.process_item(key).await;
        }

        debug!(controller = %self.config.name, worker, "Worker stopped");
    }

    #[instrument(skip(self, key), fields(controller = %self.config.name, key = %key))]
    async fn process_item(self: &Arc<Self>, key: WorkspaceKey) {
        self.report_depth();

        if let Err(err) = self.guard.validate(&key) {
            warn!(error = %err, "Dropping queued key outside allowed workspaces");
            self.record_denied();
            self.queue.forget(&key);
            self.work_items.remove(&key);
            self.queue.done(&key);
            return;
        }

        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                let delay = self.config.circuit_open_requeue_delay();
                debug!(
                    breaker = breaker.name(),
                    delay_ms = delay.as_millis() as u64,
                    "Circuit open, deferring key"
                );
                self.queue.add_after(key.clone(), delay);
                self.queue.done(&key);
                return;
            }
        }

        let item = {
            let mut entry = self
                .work_items
                .entry(key.clone())
                .or_insert_with(|| WorkItem::new(key.clone()));
            entry.begin_attempt();
            entry.value().clone()
        };
        let ctx = ReconcileContext::new(self.config.name.clone(), item, self.stop.child_token());

        let outcome = AssertUnwindSafe(self.reconciler.reconcile(&ctx, &key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow!(
                    "reconciler panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });

        match outcome {
            Ok(()) => self.handle_success(&key),
            Err(err) => self.handle_error(&key, err),
        }

        self.queue.done(&key);
        self.report_depth();
    }

    fn handle_success(&self, key: &WorkspaceKey) {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
        self.queue.forget(key);
        self.work_items.remove(key);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_processed(&self.config.name, ReconcileOutcome::Success);

        let recovered = {
            let mut health = self.health.lock();
            if health.error_dropped {
                health.error_dropped = false;
                health.drop_epoch = health.drop_epoch.wrapping_add(1);
                true
            } else {
                false
            }
        };
        if recovered {
            info!("Controller healthy again after successful reconcile");
        }
        debug!("Reconciled");
    }

    fn handle_error(self: &Arc<Self>, key: &WorkspaceKey, err: anyhow::Error) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_processed(&self.config.name, ReconcileOutcome::Error);

        let attempts = match self.work_items.get_mut(key) {
            Some(mut item) => {
                item.record_error(format!("{err:#}"));
                item.attempts
            }
            None => 0,
        };

        if let Some(retry) = &self.retry {
            if !retry.is_retryable(err.as_ref()) {
                warn!(attempts, error = %format!("{err:#}"), "Non-retryable reconcile error");
                self.drop_item(key, err);
                return;
            }
        }

        let requeues = self.queue.num_requeues(key);
        if requeues < self.config.max_retries {
            let limiter_delay = self.queue.when(key);
            let delay = self
                .retry
                .as_ref()
                .and_then(|retry| retry.backoff_override(err.as_ref()))
                .unwrap_or(limiter_delay);

            debug!(
                attempts,
                requeues = requeues + 1,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "Requeueing after reconcile error"
            );
            self.queue.add_after(key.clone(), delay);
            return;
        }

        warn!(
            attempts,
            requeues,
            max_retries = self.config.max_retries,
            "Max retries exceeded"
        );
        self.drop_item(key, err);
    }

    fn drop_item(self: &Arc<Self>, key: &WorkspaceKey, err: anyhow::Error) {
        self.queue.forget(key);
        self.work_items.remove(key);
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        self.error_sink.report(&self.config.name, key, &err);
        self.mark_unhealthy();
    }

    fn mark_unhealthy(self: &Arc<Self>) {
        let epoch = {
            let mut health = self.health.lock();
            health.error_dropped = true;
            health.drop_epoch = health.drop_epoch.wrapping_add(1);
            health.drop_epoch
        };

        let grace = self.config.health_recovery_grace();
        let controller = Arc::downgrade(self);
        let stop = self.stop.clone();
        self.timers.spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    if let Some(controller) = controller.upgrade() {
                        controller.recover_health(epoch);
                    }
                }
            }
        });
    }

    fn recover_health(&self, epoch: u64) {
        let mut health = self.health.lock();
        if health.error_dropped && health.drop_epoch == epoch {
            health.error_dropped = false;
            info!(
                controller = %self.config.name,
                grace_secs = self.config.health_recovery_grace_secs,
                "Controller health recovered after grace period"
            );
        }
    }

    fn record_denied(&self) {
        self.counters.denied.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_denied(&self.config.name);
    }

    fn report_depth(&self) {
        self.metrics
            .set_queue_depth(&self.config.name, self.queue.len());
    }

    fn admit(&self, key: &WorkspaceKey) -> ControllerResult<()> {
        if self.queue.is_shutting_down() {
            return Err(ControllerError::ShuttingDown(self.config.name.clone()));
        }
        if let Err(err) = self.guard.validate(key) {
            warn!(controller = %self.config.name, key = %key, "Rejected key outside allowed workspaces");
            self.record_denied();
            return Err(err);
        }
        Ok(())
    }

    /// Enqueue a parsed key.
    pub fn enqueue(&self, key: WorkspaceKey) -> ControllerResult<()> {
        self.admit(&key)?;
        self.queue.add(key);
        self.report_depth();
        Ok(())
    }

    /// Enqueue a parsed key once `delay` has elapsed.
    pub fn enqueue_delayed(&self, key: WorkspaceKey, delay: Duration) -> ControllerResult<()> {
        self.admit(&key)?;
        self.queue.add_after(key, delay);
        Ok(())
    }

    /// Attempt bookkeeping for a key that is queued or being retried.
    pub fn work_item(&self, key: &WorkspaceKey) -> Option<WorkItem> {
        self.work_items.get(key).map(|item| item.value().clone())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            name: self.config.name.clone(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            queue_depth: self.queue.len(),
            waiting: self.queue.waiting_len(),
            healthy: self.is_healthy(),
        }
    }

    /// False before `run`, while stopping, above the queue high-water mark,
    /// or within the grace period after a dropped key.
    pub fn is_healthy(&self) -> bool {
        let depth = self.queue.len();
        let health = self.health.lock();
        health.started
            && !health.stopping
            && !health.error_dropped
            && depth <= self.config.queue_high_water_mark
    }
}

impl Enqueuer for Controller {
    fn enqueue_key(&self, key: &str) -> ControllerResult<()> {
        self.enqueue(WorkspaceKey::parse(key)?)
    }

    fn enqueue_after(&self, key: &str, delay: Duration) -> ControllerResult<()> {
        self.enqueue_delayed(WorkspaceKey::parse(key)?, delay)
    }

    fn enqueue_object(&self, object: &dyn WorkspaceScoped) -> bool {
        let key = match object.workspace_key() {
            Ok(key) => key,
            Err(err) => {
                debug!(controller = %self.config.name, error = %err, "Dropping object without a valid workspace key");
                self.record_denied();
                return false;
            }
        };

        if !self.guard.is_allowed(key.workspace()) {
            debug!(
                controller = %self.config.name,
                workspace = key.workspace(),
                "Dropping object from disallowed workspace"
            );
            self.record_denied();
            return false;
        }

        if self.queue.is_shutting_down() {
            return false;
        }

        self.queue.add(key);
        self.report_depth();
        true
    }
}

impl HealthReporter for Controller {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_healthy(&self) -> bool {
        Controller::is_healthy(self)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Reconciler for Noop {
        async fn reconcile(&self, _ctx: &ReconcileContext, _key: &WorkspaceKey) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn controller(workspaces: &[&str]) -> Arc<Controller> {
        let config = ControllerConfig {
            allowed_workspaces: workspaces.iter().map(|w| w.to_string()).collect(),
            ..ControllerConfig::named("clusters")
        };
        Controller::builder(config, Arc::new(Noop)).build().unwrap()
    }

    struct Object(&'static str, &'static str);

    impl WorkspaceScoped for Object {
        fn workspace(&self) -> &str {
            self.0
        }

        fn resource_path(&self) -> &str {
            self.1
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ControllerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(Controller::builder(config, Arc::new(Noop)).build().is_err());
    }

    #[test]
    fn test_enqueue_key_validates() {
        let controller = controller(&["team-a"]);

        assert!(controller.enqueue_key("team-a|clusters/east").is_ok());
        assert!(matches!(
            controller.enqueue_key("no-delimiter"),
            Err(ControllerError::InvalidKey(_))
        ));
        assert!(controller
            .enqueue_key("team-b|clusters/east")
            .unwrap_err()
            .is_denied());

        assert_eq!(controller.queue_len(), 1);
        assert_eq!(controller.stats().denied, 1);
    }

    #[test]
    fn test_enqueue_object_silently_drops_foreign_workspace() {
        let controller = controller(&["team-a"]);

        assert!(controller.enqueue_object(&Object("team-a", "clusters/east")));
        assert!(!controller.enqueue_object(&Object("team-b", "clusters/west")));
        assert!(!controller.enqueue_object(&Object("", "clusters/west")));

        assert_eq!(controller.queue_len(), 1);
        assert_eq!(controller.stats().denied, 2);
    }

    #[test]
    fn test_not_healthy_before_start() {
        let controller = controller(&["*"]);
        assert!(!controller.is_healthy());
        assert_eq!(HealthReporter::name(&*controller), "clusters");
    }

    #[test]
    fn test_enqueue_after_shutdown_is_rejected() {
        let controller = controller(&["*"]);
        controller.shutdown();

        assert!(matches!(
            controller.enqueue_key("team-a|clusters/east"),
            Err(ControllerError::ShuttingDown(_))
        ));
        assert!(!controller.enqueue_object(&Object("team-a", "clusters/east")));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
