// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authenticated HTTP client.
//!
//! Every request goes out with the current bearer credential. A 401 routes
//! the request through the [`RefreshCoordinator`]: one refresh runs for any
//! number of concurrent rejections, and each rejected request is replayed at
//! most once. Other failures reach the caller unchanged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::{CredentialEvent, CredentialEvents, InvalidationReason};
use crate::refresh::{RefreshCoordinator, RenewOutcome};
use crate::renew::spawn_renewer;
use crate::request::{ApiRequest, RequestPipeline};
use crate::response::{ResponsePipeline, Verdict};
use crate::slot::{FallbackSlot, FileSlot};
use crate::source::{CommandSource, CredentialSource, StaticSource};
use crate::store::TokenStore;
use crate::transport::{ApiResponse, Dispatch, Transport};

/// Builder for [`AuthClient`].
///
/// Without an explicit source, one is derived from the config: a credential
/// command if set, otherwise a static token.
pub struct AuthClientBuilder {
    config: ClientConfig,
    source: Option<Arc<dyn CredentialSource>>,
    slot: Option<Arc<dyn FallbackSlot>>,
    store: Option<Arc<TokenStore>>,
    events: CredentialEvents,
    renewer: bool,
}

impl AuthClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            source: None,
            slot: None,
            store: None,
            events: CredentialEvents::default(),
            renewer: true,
        }
    }

    pub fn source(self, source: impl CredentialSource) -> Self {
        self.shared_source(Arc::new(source))
    }

    pub fn shared_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn slot(mut self, slot: Arc<dyn FallbackSlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Share an existing store, e.g. with another client for the same caller.
    pub fn store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Skip the background renewer; credentials are only acquired on 401.
    pub fn without_renewer(mut self) -> Self {
        self.renewer = false;
        self
    }

    /// Build the client. The renewer (if enabled) acquires a credential
    /// right away in the background.
    ///
    /// Must be called within a Tokio runtime when the renewer is enabled.
    pub fn build(self) -> anyhow::Result<AuthClient> {
        let (client, interval) = self.assemble()?;
        if let Some(interval) = interval {
            client.start_renewer(interval, tokio::time::Instant::now());
        }
        Ok(client)
    }

    /// Build the client and wait for the first renewal before returning.
    ///
    /// The renewer then first fires one interval later. A failed initial
    /// renewal is not fatal: the first 401 triggers a refresh.
    pub async fn connect(self) -> anyhow::Result<AuthClient> {
        let (client, interval) = self.assemble()?;
        let outcome = client.renew_now().await;
        tracing::debug!(?outcome, "initial credential acquisition");
        if let Some(interval) = interval {
            client.start_renewer(interval, tokio::time::Instant::now() + interval);
        }
        Ok(client)
    }

    fn assemble(self) -> anyhow::Result<(AuthClient, Option<Duration>)> {
        self.config.validate()?;

        let source = match self.source {
            Some(source) => source,
            None => source_from_config(&self.config)?,
        };
        let slot = self.slot.or_else(|| {
            self.config
                .fallback_path
                .as_ref()
                .map(|path| Arc::new(FileSlot::new(path)) as Arc<dyn FallbackSlot>)
        });
        let store = self.store.unwrap_or_default();

        let pipeline = RequestPipeline::new(&self.config.base_url, Arc::clone(&store), slot.clone());
        let transport = Arc::new(Transport::new(&self.config, pipeline)?);
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            source,
            slot,
            Arc::clone(&transport) as Arc<dyn Dispatch>,
            self.events,
        );

        let client = AuthClient {
            responses: ResponsePipeline::new(Arc::clone(&store)),
            store,
            transport,
            coordinator,
            shutdown: CancellationToken::new(),
            renewer: Mutex::new(None),
        };
        let interval = if self.renewer { self.config.renew_interval() } else { None };
        Ok((client, interval))
    }
}

fn source_from_config(config: &ClientConfig) -> anyhow::Result<Arc<dyn CredentialSource>> {
    if let Some(ref command) = config.credential_command {
        return Ok(Arc::new(CommandSource::new(command)));
    }
    if let Some(ref token) = config.token {
        return Ok(Arc::new(StaticSource::new(token)));
    }
    anyhow::bail!("no credential source configured")
}

pub struct AuthClient {
    store: Arc<TokenStore>,
    transport: Arc<Transport>,
    responses: ResponsePipeline,
    coordinator: Arc<RefreshCoordinator>,
    shutdown: CancellationToken,
    renewer: Mutex<Option<JoinHandle<()>>>,
}

impl AuthClient {
    pub fn builder(config: ClientConfig) -> AuthClientBuilder {
        AuthClientBuilder::new(config)
    }

    /// Send a request, refreshing the credential and replaying once on 401.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.execute_with_cancel(request, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), abandoned with
    /// [`ErrorKind::Cancelled`](crate::error::ErrorKind::Cancelled) once
    /// `cancel` fires.
    ///
    /// Cancelling only affects this request. A refresh it started keeps
    /// running for the other waiters.
    pub async fn execute_with_cancel(
        &self,
        mut request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        tracing::debug!(
            request_id = %request.id(),
            method = %request.method,
            path = %request.path,
            "dispatching"
        );

        let Some(outcome) = self.attempt(&mut request, cancel).await else {
            return Err(ClientError::cancelled());
        };

        match self.responses.inspect(&mut request, outcome) {
            Verdict::Deliver(outcome) => outcome,
            Verdict::ReplayNow => {
                self.attempt(&mut request, cancel).await.unwrap_or_else(|| Err(ClientError::cancelled()))
            }
            Verdict::Refresh => {
                if cancel.is_cancelled() {
                    return Err(ClientError::cancelled());
                }
                let reply = self.coordinator.enqueue(request);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ClientError::cancelled()),
                    result = reply => {
                        result.unwrap_or_else(|_| Err(ClientError::refresh("refresh abandoned")))
                    }
                }
            }
        }
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.execute(ApiRequest::get(path)).await?;
        resp.json()
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.coordinator.events().subscribe()
    }

    /// Drop the credential everywhere and stop re-acquiring it until
    /// [`Self::sign_in`].
    pub fn sign_out(&self) {
        self.coordinator.sign_out();
    }

    /// Allow refreshes again after [`Self::sign_out`] and fetch a credential.
    pub async fn sign_in(&self) -> RenewOutcome {
        self.coordinator.sign_in();
        self.coordinator.renew().await
    }

    /// Drop the in-memory credential and ask the renewer for a new one.
    pub fn invalidate(&self) {
        self.store.clear();
        self.coordinator.invalidate(InvalidationReason::Manual);
    }

    /// Re-acquire the credential now, joining any in-flight refresh.
    pub async fn renew_now(&self) -> RenewOutcome {
        self.coordinator.renew().await
    }

    /// Stop the renewer and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.renewer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn attempt(
        &self,
        request: &mut ApiRequest,
        cancel: &CancellationToken,
    ) -> Option<Result<ApiResponse, ClientError>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.transport.dispatch(request) => Some(outcome),
        }
    }

    fn start_renewer(&self, interval: Duration, first_tick: tokio::time::Instant) {
        let handle = spawn_renewer(
            Arc::clone(&self.coordinator),
            self.coordinator.events().subscribe(),
            interval,
            first_tick,
            self.shutdown.clone(),
        );
        *self.renewer.lock() = Some(handle);
    }
}

impl Drop for AuthClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .field("renewer", &self.renewer.lock().is_some())
            .finish()
    }
}
