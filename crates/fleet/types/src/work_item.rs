//! Work item bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::WorkspaceKey;

/// One reconciliation request and its attempt history.
///
/// Owned by whichever worker is processing it; never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub key: WorkspaceKey,

    /// Tenant the key belongs to. Always equal to `key.workspace()`.
    pub workspace: String,

    /// Number of attempts made so far.
    pub attempts: u32,

    /// Time of the most recent attempt, `None` before the first one.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Most recent failure, rendered.
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn new(key: WorkspaceKey) -> Self {
        let workspace = key.workspace().to_string();
        Self {
            key,
            workspace,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Record the start of an attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(Utc::now());
    }

    /// Record a failed attempt.
    pub fn record_error(&mut self, error: impl ToString) {
        self.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_has_no_attempts() {
        let key = WorkspaceKey::new("team-a", "clusters/east").unwrap();
        let item = WorkItem::new(key);

        assert_eq!(item.workspace, "team-a");
        assert_eq!(item.attempts, 0);
        assert!(item.last_attempt_at.is_none());
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_begin_attempt_stamps_time() {
        let key = WorkspaceKey::new("team-a", "clusters/east").unwrap();
        let mut item = WorkItem::new(key);

        item.begin_attempt();
        item.record_error("connection refused");

        assert_eq!(item.attempts, 1);
        assert!(item.last_attempt_at.is_some());
        assert_eq!(item.last_error.as_deref(), Some("connection refused"));
    }
}
