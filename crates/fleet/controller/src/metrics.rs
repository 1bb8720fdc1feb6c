//! Controller metrics
//!
//! The controller only talks to [`MetricsSink`]; the Prometheus
//! implementation registers its collectors on a registry the caller owns.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Outcome label for a processed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Success,
    Error,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Success => "success",
            ReconcileOutcome::Error => "error",
        }
    }
}

/// Receives controller measurements.
pub trait MetricsSink: Send + Sync {
    /// One key was processed.
    fn record_processed(&self, controller: &str, outcome: ReconcileOutcome);

    /// Current number of pending keys.
    fn set_queue_depth(&self, controller: &str, depth: usize);

    /// A key or object was rejected by workspace isolation.
    fn record_denied(&self, controller: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {
    fn record_processed(&self, _controller: &str, _outcome: ReconcileOutcome) {}

    fn set_queue_depth(&self, _controller: &str, _depth: usize) {}

    fn record_denied(&self, _controller: &str) {}
}

/// Prometheus collectors for controller loops.
#[derive(Clone)]
pub struct PrometheusMetrics {
    /// Processed keys by controller and result.
    pub reconcile_total: IntCounterVec,

    /// Pending keys by controller.
    pub queue_depth: IntGaugeVec,

    /// Workspace isolation rejections by controller.
    pub workspace_denials_total: IntCounterVec,
}

impl PrometheusMetrics {
    /// Create the collectors and register them on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconcile_total = IntCounterVec::new(
            Opts::new("controller_reconcile_total", "Total keys processed by controller"),
            &["controller", "result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("controller_queue_depth", "Keys pending in the controller queue"),
            &["controller"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let workspace_denials_total = IntCounterVec::new(
            Opts::new(
                "controller_workspace_denials_total",
                "Keys dropped by workspace isolation",
            ),
            &["controller"],
        )?;
        registry.register(Box::new(workspace_denials_total.clone()))?;

        Ok(Self {
            reconcile_total,
            queue_depth,
            workspace_denials_total,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_processed(&self, controller: &str, outcome: ReconcileOutcome) {
        self.reconcile_total
            .with_label_values(&[controller, outcome.as_str()])
            .inc();
    }

    fn set_queue_depth(&self, controller: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[controller])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    fn record_denied(&self, controller: &str) {
        self.workspace_denials_total
            .with_label_values(&[controller])
            .inc();
    }
}
