// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire boundary: sends prepared requests and classifies the outcome.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorKind};
use crate::request::{ApiRequest, RequestPipeline};

/// A successful (non-error status) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends one request attempt. The refresh coordinator replays through this.
///
/// Object-safe for use as `Arc<dyn Dispatch>`.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        request: &'a mut ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, ClientError>> + Send + 'a>>;
}

/// reqwest-backed dispatcher with a fixed per-request timeout.
pub struct Transport {
    http: Client,
    pipeline: RequestPipeline,
}

impl Transport {
    pub fn new(config: &ClientConfig, pipeline: RequestPipeline) -> anyhow::Result<Self> {
        crate::tls::ensure_crypto();
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { http, pipeline })
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    async fn send(&self, request: &mut ApiRequest) -> Result<ApiResponse, ClientError> {
        let builder = self.pipeline.prepare(&self.http, request);
        let resp = builder.send().await.map_err(|e| ClientError::transport(&e))?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| ClientError::transport(&e))?;

        match ErrorKind::from_status(status) {
            None => {
                tracing::debug!(request_id = %request.id(), status, "request succeeded");
                Ok(ApiResponse { status, headers, body })
            }
            Some(kind) => {
                tracing::debug!(request_id = %request.id(), status, %kind, "request failed");
                Err(ClientError::from_response(status, &String::from_utf8_lossy(&body)))
            }
        }
    }
}

impl Dispatch for Transport {
    fn dispatch<'a>(
        &'a self,
        request: &'a mut ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, ClientError>> + Send + 'a>> {
        Box::pin(self.send(request))
    }
}
