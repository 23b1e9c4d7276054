// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokengate: authenticated HTTP client with single-flight credential refresh.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod refresh;
pub mod renew;
pub mod request;
pub mod response;
pub mod slot;
pub mod source;
pub mod store;
pub mod test_support;
pub mod tls;
pub mod transport;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::AuthClient;
use crate::config::Cli;
use crate::error::ClientError;
use crate::request::ApiRequest;
use crate::transport::ApiResponse;

/// One output line of the `tokengate` binary.
#[derive(Debug, Serialize)]
pub struct Report {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

#[derive(Debug, Serialize)]
pub struct ReportError {
    pub kind: &'static str,
    pub message: String,
}

impl Report {
    pub fn new(path: &str, result: Result<ApiResponse, ClientError>) -> Self {
        match result {
            Ok(resp) => {
                let body = serde_json::from_slice(&resp.body)
                    .unwrap_or_else(|_| serde_json::Value::String(resp.text()));
                Self { path: path.to_owned(), status: Some(resp.status), body: Some(body), error: None }
            }
            Err(e) => Self {
                path: path.to_owned(),
                status: e.status,
                body: None,
                error: Some(ReportError { kind: e.kind.as_str(), message: e.message }),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// GET every path concurrently and print one JSON line per path, in
/// argument order. Returns whether all requests succeeded.
pub async fn run(cli: Cli) -> anyhow::Result<bool> {
    cli.validate()?;

    let client = AuthClient::builder(cli.client.clone()).connect().await?;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received SIGINT, cancelling requests");
                cancel.cancel();
            }
        });
    }

    let requests = cli.paths.iter().map(|path| {
        let client = &client;
        let cancel = &cancel;
        async move { Report::new(path, client.execute_with_cancel(ApiRequest::get(path), cancel).await) }
    });
    let reports = futures_util::future::join_all(requests).await;

    let mut ok = true;
    for report in &reports {
        ok &= report.is_success();
        println!("{}", serde_json::to_string(report)?);
    }

    client.shutdown().await;
    Ok(ok)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
