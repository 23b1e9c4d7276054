// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for an [`AuthClient`](crate::client::AuthClient).
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL that relative request paths are joined onto.
    #[arg(long, env = "TOKENGATE_BASE_URL")]
    pub base_url: String,

    /// Per-request timeout in milliseconds. Covers every dispatch, replays included.
    #[arg(long, default_value_t = 30000, env = "TOKENGATE_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Proactive renewal interval in milliseconds (0 = disabled).
    #[arg(long, default_value_t = 240000, env = "TOKENGATE_RENEW_INTERVAL_MS")]
    pub renew_interval_ms: u64,

    /// File holding the last issued credential, read when the store is empty.
    #[arg(long, env = "TOKENGATE_FALLBACK_PATH")]
    pub fallback_path: Option<PathBuf>,

    /// Shell command printing `{"token": "...", "expires_in": N}` (run via `sh -c`).
    #[arg(long, env = "TOKENGATE_CREDENTIAL_COMMAND")]
    pub credential_command: Option<String>,

    /// Fixed bearer token, used when no credential command is configured.
    #[arg(long, env = "TOKENGATE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: 30000,
            renew_interval_ms: 240000,
            fallback_path: None,
            credential_command: None,
            token: None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn renew_interval(&self) -> Option<Duration> {
        (self.renew_interval_ms > 0).then(|| Duration::from_millis(self.renew_interval_ms))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("--base-url must start with http:// or https://");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        if self.credential_command.is_some() && self.token.is_some() {
            anyhow::bail!("cannot specify both --credential-command and --token");
        }
        Ok(())
    }
}

/// Issue authenticated GET requests and print one JSON line per path.
#[derive(Debug, Parser)]
#[command(name = "tokengate", version)]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientConfig,

    /// Log format (json or text).
    #[arg(long, env = "TOKENGATE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOKENGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Paths to fetch, relative to the base URL.
    #[arg(required = true)]
    pub paths: Vec<String>,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.client.validate()?;
        if self.client.credential_command.is_none() && self.client.token.is_none() {
            anyhow::bail!("either --credential-command or --token must be specified");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
