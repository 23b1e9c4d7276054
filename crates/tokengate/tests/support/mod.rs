// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process mock API for client integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use tokengate::config::ClientConfig;

/// One request as received by the mock.
#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub requested_with: Option<String>,
}

impl Hit {
    pub fn bearer(&self) -> Option<&str> {
        self.authorization.as_deref().and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Default)]
struct MockState {
    accepted: Mutex<Vec<String>>,
    hits: Mutex<Vec<Hit>>,
}

/// Serves every path. Special paths:
///
/// - `/forbidden` → 403, `/boom` → 500, `/missing` → 404
/// - `/always401` → 401 regardless of credential
/// - `/slow` → 200 after two seconds
///
/// Anything else is 200 with a JSON body when the bearer token is accepted,
/// 401 otherwise.
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockApi {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointing at this mock, with the renewer disabled.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.base_url());
        config.renew_interval_ms = 0;
        config.timeout_ms = 5000;
        config
    }

    pub fn accept(&self, token: &str) {
        self.state.accepted.lock().push(token.to_owned());
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().clone()
    }

    pub fn hits_for(&self, path: &str) -> Vec<Hit> {
        self.hits().into_iter().filter(|h| h.path == path).collect()
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    let hit = Hit {
        path: uri.path().to_owned(),
        query: uri.query().map(str::to_owned),
        authorization: header("authorization"),
        requested_with: header("x-requested-with"),
    };
    state.hits.lock().push(hit.clone());

    match hit.path.as_str() {
        "/forbidden" => return (StatusCode::FORBIDDEN, "not yours".to_owned()),
        "/boom" => return (StatusCode::INTERNAL_SERVER_ERROR, "kaboom".to_owned()),
        "/missing" => return (StatusCode::NOT_FOUND, String::new()),
        "/always401" => return (StatusCode::UNAUTHORIZED, "no".to_owned()),
        "/slow" => tokio::time::sleep(Duration::from_secs(2)).await,
        _ => {}
    }

    let accepted = hit.bearer().is_some_and(|t| state.accepted.lock().iter().any(|a| a == t));
    if !accepted {
        return (StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized"}"#.to_owned());
    }
    let body = serde_json::json!({ "path": hit.path, "ok": true });
    (StatusCode::OK, body.to_string())
}
