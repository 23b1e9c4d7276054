// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted credential sources and fake dispatchers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ClientError;
use crate::request::{ApiRequest, RequestPipeline};
use crate::source::{CredentialSource, IssuedCredential};
use crate::transport::{ApiResponse, Dispatch};

/// Credential source driven by a script.
///
/// Each fetch pops the next scripted result; once the script is exhausted it
/// issues `token-<n>` where `n` is the fetch count.
pub struct ScriptedSource {
    authenticated: AtomicBool,
    fetches: AtomicU32,
    delay: Mutex<Duration>,
    expires_in_secs: Mutex<Option<u64>>,
    script: Mutex<VecDeque<Result<String, String>>>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            fetches: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            expires_in_secs: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Hold every fetch for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn with_expiry(self, secs: u64) -> Self {
        *self.expires_in_secs.lock() = Some(secs);
        self
    }

    pub fn then_issue(&self, token: impl Into<String>) -> &Self {
        self.script.lock().push_back(Ok(token.into()));
        self
    }

    pub fn then_fail(&self, message: impl Into<String>) -> &Self {
        self.script.lock().push_back(Err(message.into()));
        self
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::Acquire)
    }
}

impl CredentialSource for ScriptedSource {
    fn is_authenticated(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.authenticated.load(Ordering::Acquire) })
    }

    fn fetch_credential(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<IssuedCredential>> + Send + '_>> {
        Box::pin(async move {
            let n = self.fetches.fetch_add(1, Ordering::AcqRel) + 1;
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().pop_front();
            let expires_in_secs = *self.expires_in_secs.lock();
            match next {
                Some(Ok(value)) => Ok(IssuedCredential { value, expires_in_secs }),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(IssuedCredential { value: format!("token-{n}"), expires_in_secs }),
            }
        })
    }
}

/// One request as seen by [`FakeDispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub path: String,
    pub credential: Option<String>,
}

/// In-process dispatcher that accepts exactly one credential.
///
/// Requests are decorated by a real [`RequestPipeline`] but never leave the
/// process. Anything sent with a different (or no) credential gets a 401, as
/// does every path listed in `always_reject`.
pub struct FakeDispatch {
    http: reqwest::Client,
    pipeline: RequestPipeline,
    accepted: Mutex<Option<String>>,
    always_reject: Mutex<Vec<String>>,
    slow: Mutex<Vec<(String, Duration)>>,
    log: Mutex<Vec<Dispatched>>,
    delay: Duration,
}

impl FakeDispatch {
    pub fn new(pipeline: RequestPipeline, accepted: impl Into<String>) -> Self {
        Self::with_delay(pipeline, accepted, Duration::ZERO)
    }

    pub fn with_delay(pipeline: RequestPipeline, accepted: impl Into<String>, delay: Duration) -> Self {
        crate::tls::ensure_crypto();
        Self {
            http: reqwest::Client::new(),
            pipeline,
            accepted: Mutex::new(Some(accepted.into())),
            always_reject: Mutex::new(Vec::new()),
            slow: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn accept(&self, credential: impl Into<String>) {
        *self.accepted.lock() = Some(credential.into());
    }

    pub fn always_reject(&self, path: impl Into<String>) {
        self.always_reject.lock().push(path.into());
    }

    /// Hold requests for `path` for `delay` instead of the default.
    pub fn slow_path(&self, path: impl Into<String>, delay: Duration) {
        self.slow.lock().push((path.into(), delay));
    }

    pub fn log(&self) -> Vec<Dispatched> {
        self.log.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.log.lock().iter().map(|d| d.path.clone()).collect()
    }
}

impl Dispatch for FakeDispatch {
    fn dispatch<'a>(
        &'a self,
        request: &'a mut ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, ClientError>> + Send + 'a>> {
        Box::pin(async move {
            let _ = self.pipeline.prepare(&self.http, request);
            let credential = request.sent_with().map(str::to_owned);
            self.log.lock().push(Dispatched { path: request.path.clone(), credential: credential.clone() });
            let delay = self
                .slow
                .lock()
                .iter()
                .find(|(path, _)| *path == request.path)
                .map_or(self.delay, |(_, delay)| *delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let rejected = self.always_reject.lock().contains(&request.path);
            let accepted = self.accepted.lock().clone();
            if rejected || credential.is_none() || credential != accepted {
                return Err(ClientError::from_response(401, "unauthorized"));
            }
            Ok(ApiResponse::new(200, format!("ok {}", request.path)))
        })
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression returns `Err` whose message contains a substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
