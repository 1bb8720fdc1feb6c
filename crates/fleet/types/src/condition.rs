//! Status conditions
//!
//! A condition is a typed, timestamped health signal. Its
//! `last_transition_time` only moves when something observable about the
//! condition changes, never on a no-op update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type synthesized from all other conditions of a cluster.
pub const READY_CONDITION: &str = "Ready";

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How much a failing condition matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for ConditionSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionSeverity::Info => write!(f, "Info"),
            ConditionSeverity::Warning => write!(f, "Warning"),
            ConditionSeverity::Error => write!(f, "Error"),
        }
    }
}

/// A single observed condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type tag, e.g. `Connection` or `Ready`.
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    pub severity: ConditionSeverity,

    /// Machine-readable CamelCase reason.
    pub reason: String,

    /// Human-readable detail.
    pub message: String,

    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        severity: ConditionSeverity,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            severity,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Replace the transition timestamp.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = time;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    pub fn is_ready_condition(&self) -> bool {
        self.condition_type == READY_CONDITION
    }

    /// Whether everything except the timestamp matches `other`.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.severity == other.severity
            && self.message == other.message
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Insert or update a condition, preserving `last_transition_time` when the
/// observable state did not change.
///
/// Returns `true` if the stored condition changed.
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) if existing.same_state(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn connection(status: ConditionStatus, time: DateTime<Utc>) -> Condition {
        Condition::new(
            "Connection",
            status,
            ConditionSeverity::Error,
            "Probe",
            "api server probe",
        )
        .at(time)
    }

    #[test]
    fn test_upsert_noop_keeps_transition_time() {
        let first = Utc::now() - Duration::minutes(10);
        let mut conditions = vec![connection(ConditionStatus::True, first)];

        let changed = upsert_condition(&mut conditions, connection(ConditionStatus::True, Utc::now()));

        assert!(!changed);
        assert_eq!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_upsert_status_change_moves_transition_time() {
        let first = Utc::now() - Duration::minutes(10);
        let later = Utc::now();
        let mut conditions = vec![connection(ConditionStatus::True, first)];

        let changed = upsert_condition(&mut conditions, connection(ConditionStatus::False, later));

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].last_transition_time, later);
    }

    #[test]
    fn test_upsert_message_change_counts_as_transition() {
        let first = Utc::now() - Duration::minutes(1);
        let mut conditions = vec![connection(ConditionStatus::True, first)];

        let mut updated = connection(ConditionStatus::True, Utc::now());
        updated.message = "api server probe (retry)".to_string();

        assert!(upsert_condition(&mut conditions, updated));
        assert_ne!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_serde_field_names() {
        let condition = connection(ConditionStatus::Unknown, Utc::now());
        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["type"], "Connection");
        assert_eq!(json["status"], "Unknown");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
