// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal and persistence across client lifetimes.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokengate::client::AuthClient;
use tokengate::event::CredentialEvent;
use tokengate::refresh::RenewOutcome;
use tokengate::request::ApiRequest;
use tokengate::slot::{FallbackSlot, FileSlot};
use tokengate::source::CredentialSource;
use tokengate::test_support::ScriptedSource;

use support::MockApi;

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn connect_acquires_before_first_request() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    api.accept("token-1");
    let source = Arc::new(ScriptedSource::new().with_expiry(3600));
    let mut config = api.config();
    config.renew_interval_ms = 60_000;

    let client = AuthClient::builder(config)
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .connect()
        .await?;

    assert_eq!(source.fetches(), 1);
    client.execute(ApiRequest::get("/me")).await?;
    assert_eq!(api.hits_for("/me").len(), 1);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn renewer_runs_on_its_interval() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let source = Arc::new(ScriptedSource::new());
    let mut config = api.config();
    config.renew_interval_ms = 50;

    let client = AuthClient::builder(config)
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .build()?;

    wait_for("three renewals", || source.fetches() >= 3).await?;
    let current = client.store().get().map(|c| c.value().to_owned());
    assert!(current.is_some_and(|v| v.starts_with("token-")));

    client.shutdown().await;
    let after = source.fetches();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(source.fetches(), after, "renewer kept running after shutdown");
    Ok(())
}

#[tokio::test]
async fn invalidate_triggers_immediate_renewal() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let source = Arc::new(ScriptedSource::new());
    let mut config = api.config();
    config.renew_interval_ms = 3_600_000;

    let client = AuthClient::builder(config)
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .connect()
        .await?;
    assert_eq!(source.fetches(), 1);

    client.invalidate();
    wait_for("renewal after invalidation", || source.fetches() == 2).await?;
    wait_for("new credential", || client.store().get().is_some_and(|c| c.value() == "token-2")).await?;

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn renew_now_reports_outcome_and_broadcasts() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let source = Arc::new(ScriptedSource::new().with_expiry(120));
    let client = AuthClient::builder(api.config())
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .build()?;
    let mut events = client.subscribe();

    assert_eq!(client.renew_now().await, RenewOutcome::Renewed);
    assert_eq!(events.recv().await?, CredentialEvent::Renewed { expires_in_secs: Some(120), generation: 1 });

    source.set_authenticated(false);
    assert_eq!(client.renew_now().await, RenewOutcome::SignedOut);
    assert_eq!(events.recv().await?, CredentialEvent::Cleared);
    assert!(client.store().get().is_none());
    Ok(())
}

#[tokio::test]
async fn file_slot_carries_credential_to_next_client() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("credential.json");
    let api = MockApi::start().await?;
    api.accept("token-1");

    let mut config = api.config();
    config.fallback_path = Some(path.clone());

    let first = AuthClient::builder(config.clone()).source(ScriptedSource::new()).connect().await?;
    first.shutdown().await;
    drop(first);
    assert_eq!(FileSlot::new(&path).load().as_deref(), Some("token-1"));

    // A fresh process: empty store, a source that would issue something else.
    let source = Arc::new(ScriptedSource::new());
    source.then_issue("unexpected");
    let second = AuthClient::builder(config)
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .build()?;

    second.execute(ApiRequest::get("/me")).await?;
    assert_eq!(api.hits_for("/me")[0].bearer(), Some("token-1"));
    assert_eq!(source.fetches(), 0);
    Ok(())
}

#[tokio::test]
async fn sign_out_removes_the_slot_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("credential.json");
    let api = MockApi::start().await?;
    let mut config = api.config();
    config.fallback_path = Some(path.clone());

    let client = AuthClient::builder(config).source(ScriptedSource::new()).connect().await?;
    assert!(path.exists());

    client.sign_out();
    assert!(!path.exists());
    assert!(client.store().get().is_none());
    Ok(())
}

#[tokio::test]
async fn sign_out_holds_across_renewer_ticks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("credential.json");
    let api = MockApi::start().await?;
    let source = Arc::new(ScriptedSource::new());
    let mut config = api.config();
    config.renew_interval_ms = 50;
    config.fallback_path = Some(path.clone());

    let client = AuthClient::builder(config)
        .shared_source(Arc::clone(&source) as Arc<dyn CredentialSource>)
        .connect()
        .await?;
    assert!(path.exists());

    client.sign_out();
    let fetched = source.fetches();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.store().get().is_none());
    assert!(!path.exists());
    assert_eq!(source.fetches(), fetched, "renewer re-acquired after sign-out");

    assert_eq!(client.sign_in().await, RenewOutcome::Renewed);
    assert!(path.exists());
    client.shutdown().await;
    Ok(())
}
