//! Workspace isolation.
//!
//! Every key a controller handles belongs to exactly one workspace. The
//! guard holds the set of workspaces a controller may touch and is checked
//! on enqueue and again before reconcile.

use std::collections::HashSet;

use fleet_types::WorkspaceKey;
use parking_lot::RwLock;

use crate::error::{ControllerError, ControllerResult};

/// Allow-set entry admitting every workspace.
pub const WILDCARD_WORKSPACE: &str = "*";

/// Objects that can be enqueued by value rather than by key.
pub trait WorkspaceScoped {
    /// Owning workspace.
    fn workspace(&self) -> &str;

    /// Resource path within the workspace.
    fn resource_path(&self) -> &str;

    /// Workspace-scoped key for this object.
    fn workspace_key(&self) -> ControllerResult<WorkspaceKey> {
        Ok(WorkspaceKey::new(self.workspace(), self.resource_path())?)
    }
}

/// Lock-guarded workspace allow-set. An empty set admits nothing.
#[derive(Debug)]
pub struct WorkspaceGuard {
    controller: String,
    allowed: RwLock<HashSet<String>>,
}

impl WorkspaceGuard {
    pub fn new<I, S>(controller: impl Into<String>, workspaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            controller: controller.into(),
            allowed: RwLock::new(workspaces.into_iter().map(Into::into).collect()),
        }
    }

    /// A guard admitting every workspace.
    pub fn allow_all(controller: impl Into<String>) -> Self {
        Self::new(controller, [WILDCARD_WORKSPACE])
    }

    pub fn allow(&self, workspace: impl Into<String>) {
        self.allowed.write().insert(workspace.into());
    }

    pub fn revoke(&self, workspace: &str) -> bool {
        self.allowed.write().remove(workspace)
    }

    pub fn is_allowed(&self, workspace: &str) -> bool {
        let allowed = self.allowed.read();
        allowed.contains(WILDCARD_WORKSPACE) || allowed.contains(workspace)
    }

    /// Reject keys outside the allow-set.
    pub fn validate(&self, key: &WorkspaceKey) -> ControllerResult<()> {
        if self.is_allowed(key.workspace()) {
            Ok(())
        } else {
            Err(ControllerError::WorkspaceDenied {
                controller: self.controller.clone(),
                workspace: key.workspace().to_string(),
            })
        }
    }

    /// Allowed workspaces, sorted.
    pub fn workspaces(&self) -> Vec<String> {
        let mut workspaces: Vec<_> = self.allowed.read().iter().cloned().collect();
        workspaces.sort();
        workspaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(workspace: &str) -> WorkspaceKey {
        WorkspaceKey::new(workspace, "clusters/east").unwrap()
    }

    #[test]
    fn test_allow_set() {
        let guard = WorkspaceGuard::new("clusters", ["team-a"]);

        assert!(guard.validate(&key("team-a")).is_ok());
        let err = guard.validate(&key("team-b")).unwrap_err();
        assert!(err.is_denied());

        guard.allow("team-b");
        assert!(guard.validate(&key("team-b")).is_ok());

        assert!(guard.revoke("team-a"));
        assert!(guard.validate(&key("team-a")).is_err());
        assert_eq!(guard.workspaces(), vec!["team-b"]);
    }

    #[test]
    fn test_empty_set_denies_everything() {
        let guard = WorkspaceGuard::new("clusters", Vec::<String>::new());
        assert!(!guard.is_allowed("team-a"));
    }

    #[test]
    fn test_wildcard_admits_everything() {
        let guard = WorkspaceGuard::allow_all("clusters");
        assert!(guard.is_allowed("team-a"));
        assert!(guard.is_allowed("anything"));
    }

    struct Cluster {
        workspace: String,
        path: String,
    }

    impl WorkspaceScoped for Cluster {
        fn workspace(&self) -> &str {
            &self.workspace
        }

        fn resource_path(&self) -> &str {
            &self.path
        }
    }

    #[test]
    fn test_workspace_scoped_key() {
        let cluster = Cluster {
            workspace: "team-a".to_string(),
            path: "clusters/east".to_string(),
        };
        assert_eq!(cluster.workspace_key().unwrap().as_str(), "team-a|clusters/east");

        let orphan = Cluster {
            workspace: String::new(),
            path: "clusters/east".to_string(),
        };
        assert!(matches!(
            orphan.workspace_key(),
            Err(ControllerError::InvalidKey(_))
        ));
    }
}
