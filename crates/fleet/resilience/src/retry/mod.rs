//! Classified retry with exponential backoff.
//!
//! A [`RetryPolicy`] holds the backoff parameters and an ordered list of
//! [`ErrorClassifier`]s. The [`RetryManager`] applies the policy to a
//! [`fleet_types::WorkItem`]'s attempt history.

mod classifier;
mod manager;
mod policy;

pub use classifier::{
    error_text, ConflictErrorClassifier, ErrorClassifier, NetworkErrorClassifier,
    SubstringClassifier,
};
pub use manager::{RetryContext, RetryManager};
pub use policy::{RetryPolicy, RetryPolicyBuilder};
