//! Workspace-scoped reconciliation keys
//!
//! Every key is `workspace|resource`. The workspace half is the tenant
//! boundary the controller enforces before any reconciler sees the key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the workspace and resource halves of a key.
pub const KEY_DELIMITER: char = '|';

/// Errors produced while building or parsing a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Key has no delimiter at all.
    #[error("key {0:?} is not of the form workspace|resource")]
    MissingDelimiter(String),

    /// Workspace half is empty.
    #[error("key {0:?} has an empty workspace")]
    EmptyWorkspace(String),

    /// Resource half is empty.
    #[error("key {0:?} has an empty resource path")]
    EmptyResource(String),

    /// Workspace contains the delimiter and would not round-trip.
    #[error("workspace {0:?} must not contain the key delimiter")]
    DelimiterInWorkspace(String),
}

/// Identifier of one reconciliation request, scoped to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceKey {
    raw: String,
    split: usize,
}

impl WorkspaceKey {
    /// Build a key from its two halves.
    pub fn new(workspace: impl AsRef<str>, resource: impl AsRef<str>) -> Result<Self, KeyError> {
        let workspace = workspace.as_ref();
        let resource = resource.as_ref();

        if workspace.contains(KEY_DELIMITER) {
            return Err(KeyError::DelimiterInWorkspace(workspace.to_string()));
        }

        Self::parse(&format!("{workspace}{KEY_DELIMITER}{resource}"))
    }

    /// Parse a raw `workspace|resource` string.
    ///
    /// The first delimiter splits the key; the resource half may itself
    /// contain further delimiters.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let split = raw
            .find(KEY_DELIMITER)
            .ok_or_else(|| KeyError::MissingDelimiter(raw.to_string()))?;

        let (workspace, rest) = raw.split_at(split);
        let resource = &rest[KEY_DELIMITER.len_utf8()..];

        if workspace.trim().is_empty() {
            return Err(KeyError::EmptyWorkspace(raw.to_string()));
        }
        if resource.trim().is_empty() {
            return Err(KeyError::EmptyResource(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            split,
        })
    }

    /// Workspace (tenant) half of the key.
    pub fn workspace(&self) -> &str {
        &self.raw[..self.split]
    }

    /// Resource path half of the key.
    pub fn resource(&self) -> &str {
        &self.raw[self.split + KEY_DELIMITER.len_utf8()..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for WorkspaceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspaceKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspaceKey> for String {
    fn from(key: WorkspaceKey) -> Self {
        key.raw
    }
}
