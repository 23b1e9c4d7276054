// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle events, including the invalidation signal.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why the current credential was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// The server rejected the credential with 401.
    Rejected,
    /// The caller signed out.
    SignOut,
    /// Explicit invalidation by an embedding component.
    Manual,
}

/// Events broadcast by the refresh coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CredentialEvent {
    /// The current credential must not be used any more.
    ///
    /// `generation` is the number of settled refreshes at emission time.
    Invalidated { reason: InvalidationReason, generation: u64 },
    /// A fresh credential was stored.
    Renewed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_in_secs: Option<u64>,
        generation: u64,
    },
    /// The store was cleared because the caller is not signed in.
    Cleared,
    /// A refresh could not obtain a credential.
    RefreshFailed { error: String },
}

/// Broadcast hub for [`CredentialEvent`]s.
///
/// Subscribers register at construction time; lagging receivers drop old
/// events rather than blocking the sender.
#[derive(Debug, Clone)]
pub struct CredentialEvents {
    tx: broadcast::Sender<CredentialEvent>,
}

impl CredentialEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers. Having none is not an error.
    pub fn emit(&self, event: CredentialEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for CredentialEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
