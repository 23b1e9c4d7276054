// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `tokengate` binary as a subprocess against an in-process
//! mock API and collects its JSON report lines.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;

/// Resolve the path to the compiled `tokengate` binary.
pub fn tokengate_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tokengate")
}

struct ApiState {
    token: String,
    hits: AtomicU32,
}

/// Mock API accepting a single bearer token. `/boom` always answers 500.
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
}

impl MockApi {
    pub async fn start(token: &str) -> anyhow::Result<Self> {
        let state = Arc::new(ApiState { token: token.to_owned(), hits: AtomicU32::new(0) });
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> u32 {
        self.state.hits.load(Ordering::Relaxed)
    }
}

async fn handle(State(state): State<Arc<ApiState>>, uri: Uri, headers: HeaderMap) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::Relaxed);
    if uri.path() == "/boom" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "kaboom".to_owned());
    }
    let expected = format!("Bearer {}", state.token);
    let authorized = headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(expected.as_str());
    if !authorized {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    (StatusCode::OK, serde_json::json!({ "path": uri.path() }).to_string())
}

/// Outcome of one `tokengate` invocation.
#[derive(Debug)]
pub struct RunOutput {
    pub status: ExitStatus,
    pub reports: Vec<serde_json::Value>,
    pub stderr: String,
}

/// Run `tokengate` with `args` and parse every stdout line as JSON.
///
/// `TOKENGATE_*` variables from the outer environment are not inherited.
pub async fn run_tokengate(args: &[&str], timeout: Duration) -> anyhow::Result<RunOutput> {
    let binary = tokengate_binary();
    anyhow::ensure!(binary.exists(), "tokengate binary not found at {}", binary.display());

    let mut command = tokio::process::Command::new(&binary);
    command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    for (key, _) in std::env::vars() {
        if key.starts_with("TOKENGATE_") {
            command.env_remove(key);
        }
    }
    command.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| anyhow::anyhow!("tokengate did not exit within {timeout:?}"))??;

    let stdout = String::from_utf8(output.stdout)?;
    let reports = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RunOutput {
        status: output.status,
        reports,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
