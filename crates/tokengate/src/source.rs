// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential sources: whatever actually issues bearer tokens.
//!
//! The client never reasons about how a credential was produced. It asks the
//! source whether the caller is signed in and, if so, for a fresh credential.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

/// A freshly issued credential.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub value: String,
    pub expires_in_secs: Option<u64>,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("value", &"<redacted>")
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

/// Supplier of fresh credentials.
///
/// Object-safe for use as `Arc<dyn CredentialSource>`.
pub trait CredentialSource: Send + Sync + 'static {
    fn is_authenticated(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn fetch_credential(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<IssuedCredential>> + Send + '_>>;
}

/// A fixed, long-lived token. Always authenticated, never expires.
pub struct StaticSource {
    token: String,
}

impl StaticSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl CredentialSource for StaticSource {
    fn is_authenticated(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { !self.token.is_empty() })
    }

    fn fetch_credential(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<IssuedCredential>> + Send + '_>> {
        Box::pin(async move {
            anyhow::ensure!(!self.token.is_empty(), "no static token configured");
            Ok(IssuedCredential { value: self.token.clone(), expires_in_secs: None })
        })
    }
}

/// JSON printed on stdout by a credential command.
#[derive(Debug, Deserialize)]
struct CommandOutput {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Runs a shell command (`sh -c`) that prints `{"token": "...", "expires_in": N}`.
///
/// A non-zero exit is a fetch failure; the command runs again on the next
/// refresh.
pub struct CommandSource {
    command: String,
}

impl CommandSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    async fn run(&self) -> anyhow::Result<IssuedCredential> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("credential command failed ({}): {}", output.status, stderr.trim());
        }

        let parsed: CommandOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow::anyhow!("credential command printed invalid JSON: {e}"))?;
        anyhow::ensure!(!parsed.token.is_empty(), "credential command printed an empty token");

        Ok(IssuedCredential { value: parsed.token, expires_in_secs: parsed.expires_in })
    }
}

impl CredentialSource for CommandSource {
    fn is_authenticated(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { !self.command.trim().is_empty() })
    }

    fn fetch_credential(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<IssuedCredential>> + Send + '_>> {
        Box::pin(self.run())
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
