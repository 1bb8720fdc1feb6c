//! Condition aggregation and cluster health classification.
//!
//! Folds per-component conditions into one condition per type, synthesizes
//! the `Ready` rollup and derives a coarse [`ClusterHealth`]. Nothing here
//! holds mutable state; every function takes its input by reference and
//! returns a fresh value.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use fleet_types::{
    ClusterHealth, ComponentStatus, Condition, ConditionSeverity, ConditionStatus,
    READY_CONDITION,
};
use tracing::debug;

use crate::config::AggregatorConfig;
use crate::error::StatusResult;

/// Reasons set on aggregated and synthesized conditions.
pub mod reasons {
    pub const NO_COMPONENTS: &str = "NoComponents";
    pub const NO_CONDITIONS: &str = "NoConditions";
    pub const CRITICAL_COMPONENTS_FAILED: &str = "CriticalComponentsFailed";
    pub const INSUFFICIENT_DATA: &str = "InsufficientData";
    pub const COMPONENTS_DEGRADED: &str = "ComponentsDegraded";
    pub const COMPONENTS_HEALTHY: &str = "ComponentsHealthy";
    pub const CRITICAL_CONDITIONS_FAILED: &str = "CriticalConditionsFailed";
    pub const CRITICAL_CONDITIONS_UNKNOWN: &str = "CriticalConditionsUnknown";
    pub const CLUSTER_READY: &str = "ClusterReady";
}

/// One component's report of one condition type.
struct Report<'a> {
    component: &'a ComponentStatus,
    condition: &'a Condition,
}

/// Stateless condition aggregator.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    config: AggregatorConfig,
}

impl StatusAggregator {
    /// Create an aggregator, rejecting an out-of-range threshold.
    pub fn new(config: AggregatorConfig) -> StatusResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate component reports into one condition per type plus `Ready`,
    /// sorted by type. Never returns an empty list.
    ///
    /// Transition times derive only from the input, so equal input yields
    /// equal output. With no components `Ready` is stamped at the Unix epoch.
    pub fn aggregate_cluster_status(&self, components: &[ComponentStatus]) -> Vec<Condition> {
        let Some(last_update) = components.iter().map(|c| c.last_update_time).max() else {
            return vec![Condition::new(
                READY_CONDITION,
                ConditionStatus::Unknown,
                ConditionSeverity::Warning,
                reasons::NO_COMPONENTS,
                "no components reported status",
            )
            .at(DateTime::<Utc>::default())];
        };

        let mut by_type: BTreeMap<&str, Vec<Report<'_>>> = BTreeMap::new();
        for component in components {
            for condition in &component.conditions {
                if condition.is_ready_condition() {
                    continue;
                }
                by_type
                    .entry(condition.condition_type.as_str())
                    .or_default()
                    .push(Report {
                        component,
                        condition,
                    });
            }
        }

        let mut aggregated: Vec<Condition> = by_type
            .into_iter()
            .map(|(condition_type, reports)| self.aggregate_type(condition_type, &reports))
            .collect();

        let ready = self.ready_condition(&aggregated, last_update);
        debug!(
            conditions = aggregated.len(),
            ready = %ready.status,
            reason = %ready.reason,
            "Aggregated cluster status"
        );

        aggregated.push(ready);
        aggregated.sort_by(|a, b| a.condition_type.cmp(&b.condition_type));
        aggregated
    }

    fn aggregate_type(&self, condition_type: &str, reports: &[Report<'_>]) -> Condition {
        let total = reports.len();
        let mut true_count = 0usize;
        let mut false_count = 0usize;
        let mut unknown_count = 0usize;
        let mut critical_failures: Vec<&str> = Vec::new();
        let mut degraded: Vec<&str> = Vec::new();

        let type_is_critical = self.config.is_critical_type(condition_type);

        for report in reports {
            match report.condition.status {
                ConditionStatus::True => true_count += 1,
                ConditionStatus::Unknown => unknown_count += 1,
                ConditionStatus::False => {
                    false_count += 1;
                    let name = report.component.name.as_str();
                    if report.component.critical || type_is_critical {
                        push_unique(&mut critical_failures, name);
                    } else {
                        push_unique(&mut degraded, name);
                    }
                }
            }
        }

        let latest = reports
            .iter()
            .map(|r| r.component.last_update_time)
            .max()
            .unwrap_or_default();

        let healthy_ratio = true_count as f64 / total as f64;
        let below_threshold = healthy_ratio < self.config.healthy_threshold;

        let (status, severity, reason, message) = if !critical_failures.is_empty() {
            (
                ConditionStatus::False,
                ConditionSeverity::Error,
                reasons::CRITICAL_COMPONENTS_FAILED,
                format!("critical components failing: {}", critical_failures.join(", ")),
            )
        } else if unknown_count > 0 && below_threshold {
            (
                ConditionStatus::Unknown,
                ConditionSeverity::Warning,
                reasons::INSUFFICIENT_DATA,
                format!("{unknown_count} of {total} components report unknown status"),
            )
        } else if false_count > 0 && below_threshold {
            (
                ConditionStatus::False,
                ConditionSeverity::Warning,
                reasons::COMPONENTS_DEGRADED,
                format!(
                    "{false_count} of {total} components failing: {}",
                    degraded.join(", ")
                ),
            )
        } else {
            (
                ConditionStatus::True,
                ConditionSeverity::Info,
                reasons::COMPONENTS_HEALTHY,
                format!("{true_count} of {total} components healthy"),
            )
        };

        Condition::new(condition_type, status, severity, reason, message).at(latest)
    }

    /// Synthesize `Ready` from aggregated conditions (any existing `Ready`
    /// in the input is ignored). `last_update` stamps a `Ready` with nothing
    /// to derive its time from.
    fn ready_condition(&self, aggregated: &[Condition], last_update: DateTime<Utc>) -> Condition {
        let conditions: Vec<&Condition> = aggregated
            .iter()
            .filter(|c| !c.is_ready_condition())
            .collect();

        let Some(latest) = conditions.iter().map(|c| c.last_transition_time).max() else {
            return Condition::new(
                READY_CONDITION,
                ConditionStatus::Unknown,
                ConditionSeverity::Warning,
                reasons::NO_CONDITIONS,
                "components reported no conditions",
            )
            .at(last_update);
        };

        let failed = type_names(conditions.iter().filter(|c| is_critical_error(c)));
        if !failed.is_empty() {
            return Condition::new(
                READY_CONDITION,
                ConditionStatus::False,
                ConditionSeverity::Error,
                reasons::CRITICAL_CONDITIONS_FAILED,
                format!("critical conditions failed: {failed}"),
            )
            .at(latest);
        }

        let unknown = type_names(
            conditions
                .iter()
                .filter(|c| c.is_unknown() && self.config.is_critical_type(&c.condition_type)),
        );
        if !unknown.is_empty() {
            return Condition::new(
                READY_CONDITION,
                ConditionStatus::Unknown,
                ConditionSeverity::Warning,
                reasons::CRITICAL_CONDITIONS_UNKNOWN,
                format!("critical conditions unknown: {unknown}"),
            )
            .at(latest);
        }

        let warnings = type_names(conditions.iter().filter(|c| c.is_false()));
        let message = if warnings.is_empty() {
            "cluster is ready".to_string()
        } else {
            format!("cluster is ready with warnings: {warnings}")
        };

        Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            ConditionSeverity::Info,
            reasons::CLUSTER_READY,
            message,
        )
        .at(latest)
    }

    /// Classify cluster health from a condition set. `Ready` is ignored.
    pub fn compute_overall_health(&self, conditions: &[Condition]) -> ClusterHealth {
        let considered: Vec<&Condition> = conditions
            .iter()
            .filter(|c| !c.is_ready_condition())
            .collect();

        let total = considered.len();
        if total == 0 {
            return ClusterHealth::Unknown;
        }

        let critical = considered.iter().filter(|c| is_critical_error(c)).count();
        let warnings = considered
            .iter()
            .filter(|c| c.is_false() && c.severity == ConditionSeverity::Warning)
            .count();
        let unknown = considered
            .iter()
            .filter(|c| c.is_unknown() && self.config.is_critical_type(&c.condition_type))
            .count();

        let tolerance = 1.0 - self.config.healthy_threshold;
        let total = total as f64;

        if critical > 0 {
            ClusterHealth::Unhealthy
        } else if unknown as f64 / total > tolerance {
            ClusterHealth::Unknown
        } else if warnings as f64 / total > tolerance {
            ClusterHealth::Degraded
        } else {
            ClusterHealth::Healthy
        }
    }
}

fn is_critical_error(condition: &Condition) -> bool {
    condition.is_false() && condition.severity == ConditionSeverity::Error
}

fn push_unique<'a>(names: &mut Vec<&'a str>, name: &'a str) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn type_names<'a, 'b: 'a>(conditions: impl Iterator<Item = &'a &'b Condition>) -> String {
    conditions
        .map(|c| c.condition_type.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keep conditions whose `last_transition_time` is within `max_age` of now.
///
/// A non-positive `max_age` disables filtering.
pub fn filter_stale_conditions(conditions: &[Condition], max_age: Duration) -> Vec<Condition> {
    filter_stale_conditions_at(conditions, max_age, Utc::now())
}

/// [`filter_stale_conditions`] against an explicit clock.
pub fn filter_stale_conditions_at(
    conditions: &[Condition],
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    if max_age <= Duration::zero() {
        return conditions.to_vec();
    }

    conditions
        .iter()
        .filter(|c| now.signed_duration_since(c.last_transition_time) <= max_age)
        .cloned()
        .collect()
}

/// Carry `last_transition_time` over from `previous` for every condition
/// whose observable state did not change.
pub fn merge_transition_times(previous: &[Condition], current: Vec<Condition>) -> Vec<Condition> {
    current
        .into_iter()
        .map(|mut condition| {
            if let Some(prior) = previous
                .iter()
                .find(|p| p.condition_type == condition.condition_type)
            {
                if prior.same_state(&condition) {
                    condition.last_transition_time = prior.last_transition_time;
                }
            }
            condition
        })
        .collect()
}

/// Whether the `Ready` condition is present and `True`.
pub fn is_ready(conditions: &[Condition]) -> bool {
    fleet_types::find_condition(conditions, READY_CONDITION).is_some_and(|c| c.is_true())
}
