//! Error classification for retry decisions.
//!
//! Classifiers are deliberately simple: they match lower-cased substrings
//! of the whole error chain. Custom classes are built with
//! [`SubstringClassifier`] or by implementing [`ErrorClassifier`].

use std::error::Error;
use std::time::Duration;

/// Decides whether an error belongs to a retryable class.
pub trait ErrorClassifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether `error` belongs to this class.
    fn matches(&self, error: &(dyn Error + 'static)) -> bool;

    /// Fixed delay for this class, replacing the exponential backoff.
    fn backoff_override(&self) -> Option<Duration> {
        None
    }
}

/// Lower-cased text of an error and all of its sources, joined by `": "`.
pub fn error_text(error: &(dyn Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_lowercase()
}

/// Matches when any pattern occurs in the error chain text.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    name: String,
    patterns: Vec<String>,
    backoff: Option<Duration>,
}

impl SubstringClassifier {
    /// Patterns are compared case-insensitively.
    pub fn new<I, S>(name: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
            backoff: None,
        }
    }

    /// Retry this class after a fixed delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl ErrorClassifier for SubstringClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        let text = error_text(error);
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }

    fn backoff_override(&self) -> Option<Duration> {
        self.backoff
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "eof",
    "broken pipe",
    "unreachable",
    "no route to host",
];

const CONFLICT_PATTERNS: &[&str] = &[
    "conflict",
    "the object has been modified",
    "resourceversion",
    "resource version",
    "stale",
];

/// Transient network failures.
#[derive(Debug, Clone)]
pub struct NetworkErrorClassifier(SubstringClassifier);

impl NetworkErrorClassifier {
    pub fn new() -> Self {
        Self(SubstringClassifier::new("network", NETWORK_PATTERNS.iter().copied()))
    }

    pub fn with_backoff(self, backoff: Duration) -> Self {
        Self(self.0.with_backoff(backoff))
    }
}

impl Default for NetworkErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for NetworkErrorClassifier {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        self.0.matches(error)
    }

    fn backoff_override(&self) -> Option<Duration> {
        self.0.backoff_override()
    }
}

/// Optimistic-concurrency conflicts and stale resource versions.
#[derive(Debug, Clone)]
pub struct ConflictErrorClassifier(SubstringClassifier);

impl ConflictErrorClassifier {
    pub fn new() -> Self {
        Self(SubstringClassifier::new("conflict", CONFLICT_PATTERNS.iter().copied()))
    }

    pub fn with_backoff(self, backoff: Duration) -> Self {
        Self(self.0.with_backoff(backoff))
    }
}

impl Default for ConflictErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for ConflictErrorClassifier {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        self.0.matches(error)
    }

    fn backoff_override(&self) -> Option<Duration> {
        self.0.backoff_override()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_network_classifier() {
        let classifier = NetworkErrorClassifier::new();

        assert!(classifier.matches(anyhow!("dial tcp 10.0.0.1:6443: Connection Refused").as_ref()));
        assert!(classifier.matches(anyhow!("unexpected EOF").as_ref()));
        assert!(classifier.matches(anyhow!("write: broken pipe").as_ref()));
        assert!(!classifier.matches(anyhow!("invalid manifest: replicas < 0").as_ref()));
    }

    #[test]
    fn test_conflict_classifier() {
        let classifier = ConflictErrorClassifier::new().with_backoff(Duration::from_millis(50));

        let err = anyhow!(
            "Operation cannot be fulfilled: the object has been modified; please apply your changes to the latest version"
        );
        assert!(classifier.matches(err.as_ref()));
        assert_eq!(classifier.backoff_override(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_matches_anywhere_in_chain() {
        let err = Err::<(), _>(anyhow!("connection reset by peer"))
            .context("updating cluster status")
            .unwrap_err();

        assert!(NetworkErrorClassifier::new().matches(err.as_ref()));
        assert_eq!(
            error_text(err.as_ref()),
            "updating cluster status: connection reset by peer"
        );
    }

    #[test]
    fn test_substring_classifier_is_case_insensitive() {
        let classifier = SubstringClassifier::new("throttle", ["Too Many Requests"]);
        assert!(classifier.matches(anyhow!("429 too many requests").as_ref()));
        assert_eq!(classifier.name(), "throttle");
        assert!(classifier.backoff_override().is_none());
    }
}
