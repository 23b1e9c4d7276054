// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `tokengate` binary.

use std::time::Duration;

use tokengate_specs::{run_tokengate, MockApi};

const TIMEOUT: Duration = Duration::from_secs(20);
const ISSUE_ABC123: &str = r#"echo '{"token":"abc123","expires_in":3600}'"#;

#[tokio::test]
async fn fetches_paths_with_command_credential() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out = run_tokengate(
        &["--base-url", &base, "--credential-command", ISSUE_ABC123, "/me", "/items"],
        TIMEOUT,
    )
    .await?;

    assert!(out.status.success(), "stderr: {}", out.stderr);
    assert_eq!(out.reports.len(), 2);
    assert_eq!(out.reports[0]["path"], "/me");
    assert_eq!(out.reports[0]["status"], 200);
    assert_eq!(out.reports[0]["body"]["path"], "/me");
    assert_eq!(out.reports[1]["path"], "/items");
    // Credential acquired up front: no 401 round trips.
    assert_eq!(api.hits(), 2);
    Ok(())
}

#[tokio::test]
async fn any_failure_exits_nonzero() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out =
        run_tokengate(&["--base-url", &base, "--token", "abc123", "/ok", "/boom"], TIMEOUT).await?;

    assert_eq!(out.status.code(), Some(1));
    assert_eq!(out.reports.len(), 2);
    assert_eq!(out.reports[0]["status"], 200);
    assert_eq!(out.reports[1]["status"], 500);
    assert_eq!(out.reports[1]["error"]["kind"], "SERVER_FAILURE");
    Ok(())
}

#[tokio::test]
async fn rejected_token_is_reported_after_one_retry() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out = run_tokengate(&["--base-url", &base, "--token", "wrong", "/me"], TIMEOUT).await?;

    assert_eq!(out.status.code(), Some(1));
    assert_eq!(out.reports[0]["error"]["kind"], "AUTHORIZATION_FAILURE");
    assert_eq!(api.hits(), 2);
    Ok(())
}

#[tokio::test]
async fn failing_credential_command_is_a_refresh_failure() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out =
        run_tokengate(&["--base-url", &base, "--credential-command", "exit 3", "/me"], TIMEOUT)
            .await?;

    assert_eq!(out.status.code(), Some(1));
    assert_eq!(out.reports[0]["error"]["kind"], "REFRESH_FAILURE");
    Ok(())
}

#[tokio::test]
async fn persists_fallback_credential() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let slot = dir.path().join("slot.json");
    let slot_arg = slot.to_string_lossy().into_owned();
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out = run_tokengate(
        &["--base-url", &base, "--credential-command", ISSUE_ABC123, "--fallback-path", &slot_arg, "/me"],
        TIMEOUT,
    )
    .await?;
    assert!(out.status.success(), "stderr: {}", out.stderr);

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&slot)?)?;
    assert_eq!(saved["token"], "abc123");
    Ok(())
}

#[tokio::test]
async fn json_logs_stay_off_stdout() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out = run_tokengate(
        &["--base-url", &base, "--token", "abc123", "--log-format", "json", "--log-level", "tokengate=debug", "/me"],
        TIMEOUT,
    )
    .await?;

    assert!(out.status.success(), "stderr: {}", out.stderr);
    assert_eq!(out.reports.len(), 1);
    assert!(out.stderr.contains("\"level\""));
    assert!(!out.stderr.contains("abc123"), "credential leaked into logs");
    Ok(())
}

#[tokio::test]
async fn missing_credential_source_is_fatal() -> anyhow::Result<()> {
    let api = MockApi::start("abc123").await?;
    let base = api.base_url();

    let out = run_tokengate(&["--base-url", &base, "/me"], TIMEOUT).await?;

    assert_eq!(out.status.code(), Some(1));
    assert!(out.reports.is_empty());
    assert!(out.stderr.contains("--credential-command or --token"));
    assert_eq!(api.hits(), 0);
    Ok(())
}
