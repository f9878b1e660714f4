//! Sender identity check for local-only actions.
//!
//! Peers reach this node over the same transport as the node itself, so some
//! administrative or test actions must verify that the declared sender is the
//! local node before running anything.

use crate::error::{QueueError, Result};

use std::future::Future;

#[derive(Debug, Clone)]
pub struct SecurityGate {
    local_identity: String,
}

impl SecurityGate {
    /// Creates a gate for the node identified by `local_identity`.
    pub fn new(local_identity: &str) -> Self {
        Self {
            local_identity: normalize_identity(local_identity),
        }
    }

    pub fn is_local(&self, sender_identity: &str) -> bool {
        normalize_identity(sender_identity) == self.local_identity
    }

    /// Fails with [`QueueError::Security`] unless `sender_identity` is the local node.
    pub fn check(&self, sender_identity: &str) -> Result<()> {
        if self.is_local(sender_identity) {
            Ok(())
        } else {
            tracing::warn!("Rejected local-only invocation from a foreign sender identity");
            Err(QueueError::Security)
        }
    }

    /// Runs `body` only if `sender_identity` is the local node.
    ///
    /// On mismatch `body` is never called. On match its output is returned as is.
    pub async fn guard<F, Fut, T>(&self, sender_identity: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.check(sender_identity)?;
        Ok(body().await)
    }
}

/// Drops all whitespace, so the same certificate wrapped at different widths
/// or with different line endings compares equal.
fn normalize_identity(identity: &str) -> String {
    identity.chars().filter(|c| !c.is_whitespace()).collect()
}
