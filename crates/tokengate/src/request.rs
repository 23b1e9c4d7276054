// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound request descriptors and the request pipeline.
//!
//! Every dispatch goes through [`RequestPipeline::prepare`], which attaches the
//! bearer credential, the programmatic-origin marker, and (for reads) a
//! cache-busting query parameter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::Method;
use uuid::Uuid;

use crate::slot::FallbackSlot;
use crate::store::TokenStore;

/// Header marking a request as issued programmatically.
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// Query parameter carrying the cache-busting marker.
pub const CACHE_BUST_PARAM: &str = "_t";

/// A replayable description of one API call.
#[derive(Clone)]
pub struct ApiRequest {
    id: Uuid,
    pub method: Method,
    /// Path relative to the base URL, or an absolute `http(s)://` URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    retried: bool,
    /// Bearer value carried by the most recent dispatch.
    sent_with: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            retried: false,
            sent_with: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this request already went through one refresh-and-replay.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub(crate) fn sent_with(&self) -> Option<&str> {
        self.sent_with.as_deref()
    }

    /// Idempotent reads get a cache-busting marker.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("retried", &self.retried)
            .field("authenticated", &self.sent_with.is_some())
            .finish()
    }
}

/// Strictly increasing epoch-millisecond marker.
///
/// Two reads in the same millisecond still get distinct values.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: AtomicU64,
}

impl CacheBuster {
    pub fn next(&self) -> u64 {
        let now = epoch_ms();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }
}

/// Decorates every outbound request. Never fails.
pub struct RequestPipeline {
    base_url: String,
    store: Arc<TokenStore>,
    slot: Option<Arc<dyn FallbackSlot>>,
    cache_buster: CacheBuster,
}

impl RequestPipeline {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<TokenStore>,
        slot: Option<Arc<dyn FallbackSlot>>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, store, slot, cache_buster: CacheBuster::default() }
    }

    /// Credential to attach, falling back to the durable slot.
    ///
    /// A fallback hit is copied into the store without expiry so later calls
    /// skip the slot lookup.
    pub fn credential(&self) -> Option<String> {
        if let Some(cred) = self.store.get() {
            return Some(cred.value().to_owned());
        }
        let value = self.slot.as_ref()?.load()?;
        tracing::debug!("using fallback credential, repopulating store");
        self.store.set(value.clone(), None);
        Some(value)
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Build the wire request and record which credential it carries.
    pub fn prepare(
        &self,
        http: &reqwest::Client,
        request: &mut ApiRequest,
    ) -> reqwest::RequestBuilder {
        let mut builder = http.request(request.method.clone(), self.url(&request.path));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if request.is_read() {
            builder = builder.query(&[(CACHE_BUST_PARAM, self.cache_buster.next().to_string())]);
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE);

        request.sent_with = self.credential();
        if let Some(ref token) = request.sent_with {
            builder = builder.bearer_auth(token);
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        builder
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
