// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory holder for the current bearer credential.
//!
//! Expiry is lazy: nothing evicts a credential in the background. The first
//! [`TokenStore::get`] after the deadline clears it, so callers never see a
//! stale value and never need to re-check expiry themselves.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A bearer credential and its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    /// `None` means the issuer did not say; trust it until rejected.
    expires_at: Option<Instant>,
}

impl Credential {
    pub fn new(value: impl Into<String>, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|s| Instant::now() + Duration::from_secs(s));
        Self { value: value.into(), expires_at }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Remaining lifetime, or `None` if the expiry is unknown.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_at.map(|e| e.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|e| e <= Instant::now()).unwrap_or(false)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in())
            .finish()
    }
}

/// Holds at most one credential. Constructed once and shared by `Arc`.
#[derive(Default)]
pub struct TokenStore {
    current: Mutex<Option<Credential>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential, replacing whatever was there.
    pub fn set(&self, value: impl Into<String>, expires_in_secs: Option<u64>) {
        *self.current.lock() = Some(Credential::new(value, expires_in_secs));
    }

    /// Current credential, or `None` if absent or expired.
    ///
    /// An expired entry is cleared as a side effect.
    pub fn get(&self) -> Option<Credential> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(cred) if cred.is_expired() => {
                tracing::debug!("stored credential expired, clearing");
                *current = None;
                None
            }
            Some(cred) => Some(cred.clone()),
            None => None,
        }
    }

    pub fn clear(&self) {
        self.current.lock().take();
    }

    /// Whether a stored credential has passed its expiry. Does not clear.
    ///
    /// An empty store, or a credential without expiry, is not expired.
    pub fn is_expired(&self) -> bool {
        self.current.lock().as_ref().map(Credential::is_expired).unwrap_or(false)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").field("current", &*self.current.lock()).finish()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
