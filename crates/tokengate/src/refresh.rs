// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential refresh with a FIFO queue of waiting requests.
//!
//! The coordinator owns the only refresh state in the process. The
//! `Idle -> Refreshing` transition happens under one lock, so concurrently
//! rejected requests either start the refresh or join the one in flight,
//! never both. Requests that join are parked as [`PendingRequest`]s and
//! settled together once the refresh resolves:
//!
//! - success: replayed with the new credential, dispatched in arrival order
//! - failure: failed with [`ErrorKind::RefreshFailure`], store cleared
//!
//! Proactive renewals from the periodic renewer use the same single flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::event::{CredentialEvent, CredentialEvents, InvalidationReason};
use crate::request::ApiRequest;
use crate::slot::FallbackSlot;
use crate::source::{CredentialSource, IssuedCredential};
use crate::store::TokenStore;
use crate::transport::{ApiResponse, Dispatch};

/// Observable refresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Result of a proactive renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// A fresh credential was stored.
    Renewed,
    /// A refresh was already in flight; this attempt joined it.
    Coalesced,
    /// The caller is not signed in; the store was cleared.
    SignedOut,
    /// The source failed to issue a credential.
    Failed,
}

type Reply = oneshot::Sender<Result<ApiResponse, ClientError>>;

/// A request parked until the in-flight refresh settles.
pub struct PendingRequest {
    request: ApiRequest,
    reply: Reply,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .field("caller_waiting", &!self.reply.is_closed())
            .finish()
    }
}

enum Phase {
    Idle,
    Refreshing { queue: Vec<PendingRequest> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Triggered by a 401: drop the current credential first.
    Reactive,
    /// Timer or invalidation driven: keep the current credential until replaced.
    Proactive,
}

enum Failure {
    SignedOut,
    Fetch(anyhow::Error),
}

pub struct RefreshCoordinator {
    phase: Mutex<Phase>,
    store: Arc<TokenStore>,
    source: Arc<dyn CredentialSource>,
    slot: Option<Arc<dyn FallbackSlot>>,
    dispatch: Arc<dyn Dispatch>,
    events: CredentialEvents,
    /// Number of refreshes that have settled, successfully or not.
    generation: AtomicU64,
    /// Set by an explicit sign-out; refreshes fail until [`Self::sign_in`].
    signed_out: AtomicBool,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        source: Arc<dyn CredentialSource>,
        slot: Option<Arc<dyn FallbackSlot>>,
        dispatch: Arc<dyn Dispatch>,
        events: CredentialEvents,
    ) -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Idle),
            store,
            source,
            slot,
            dispatch,
            events,
            generation: AtomicU64::new(0),
            signed_out: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> RefreshState {
        match *self.phase.lock() {
            Phase::Idle => RefreshState::Idle,
            Phase::Refreshing { .. } => RefreshState::Refreshing,
        }
    }

    /// Number of requests parked behind the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &*self.phase.lock() {
            Phase::Idle => 0,
            Phase::Refreshing { queue } => queue.len(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &CredentialEvents {
        &self.events
    }

    /// Park a rejected request behind the refresh, starting one if idle.
    ///
    /// If a refresh settled after the request went out and the store already
    /// holds a different credential, the request is replayed with it instead.
    /// The refresh runs on its own task, so dropping the returned receiver
    /// (caller cancellation) never aborts it for the other waiters.
    pub fn enqueue(
        self: &Arc<Self>,
        request: ApiRequest,
    ) -> oneshot::Receiver<Result<ApiResponse, ClientError>> {
        let (reply, rx) = oneshot::channel();
        let request_id = request.id();
        let pending = PendingRequest { request, reply };

        let next = {
            let mut phase = self.phase.lock();
            match &mut *phase {
                Phase::Refreshing { queue } => {
                    queue.push(pending);
                    tracing::debug!(%request_id, queued = queue.len(), "joined in-flight refresh");
                    None
                }
                Phase::Idle if self.replaced_since(&pending.request) => Some(Err(pending)),
                Phase::Idle => {
                    *phase = Phase::Refreshing { queue: vec![pending] };
                    Some(Ok(()))
                }
            }
        };

        match next {
            None => {}
            Some(Ok(())) => {
                tracing::debug!(%request_id, "credential rejected, starting refresh");
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.run(Mode::Reactive).await;
                });
            }
            Some(Err(pending)) => {
                tracing::debug!(%request_id, "refresh already settled, replaying");
                tokio::spawn(replay(Arc::clone(&self.dispatch), vec![pending]));
            }
        }
        rx
    }

    /// Whether the store holds a live credential other than the one
    /// `request` was sent with.
    fn replaced_since(&self, request: &ApiRequest) -> bool {
        self.store.get().is_some_and(|cred| request.sent_with() != Some(cred.value()))
    }

    /// Forget the credential and refuse to refresh until [`Self::sign_in`].
    ///
    /// Broadcasts a `SignOut` invalidation; the renewer's reaction finds the
    /// caller signed out and clears again.
    pub fn sign_out(&self) {
        self.signed_out.store(true, Ordering::Release);
        self.drop_credential();
        self.invalidate(InvalidationReason::SignOut);
    }

    /// Allow refreshes again after [`Self::sign_out`].
    pub fn sign_in(&self) {
        self.signed_out.store(false, Ordering::Release);
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::Acquire)
    }

    /// Re-acquire the credential ahead of expiry.
    ///
    /// Coalesces into an in-flight refresh instead of starting a second one.
    pub async fn renew(self: &Arc<Self>) -> RenewOutcome {
        {
            let mut phase = self.phase.lock();
            if let Phase::Refreshing { .. } = *phase {
                return RenewOutcome::Coalesced;
            }
            *phase = Phase::Refreshing { queue: Vec::new() };
        }

        let coordinator = Arc::clone(self);
        match tokio::spawn(async move { coordinator.run(Mode::Proactive).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(err = %e, "renewal task failed");
                RenewOutcome::Failed
            }
        }
    }

    /// Broadcast an invalidation stamped with the current generation.
    pub fn invalidate(&self, reason: InvalidationReason) {
        let generation = self.generation();
        tracing::info!(?reason, generation, "credential invalidated");
        self.events.emit(CredentialEvent::Invalidated { reason, generation });
    }

    async fn run(self: Arc<Self>, mode: Mode) -> RenewOutcome {
        let mut guard = AbortGuard { coordinator: &self, armed: true };

        if mode == Mode::Reactive {
            // The slot holds the same rejected value; keep the pipeline from
            // falling back to it while the refresh runs.
            self.drop_credential();
            self.invalidate(InvalidationReason::Rejected);
        }

        let outcome = if !self.is_signed_out() && self.source.is_authenticated().await {
            match self.source.fetch_credential().await {
                // Signed out while the fetch was in flight.
                Ok(_) if self.is_signed_out() => Err(Failure::SignedOut),
                other => other.map_err(Failure::Fetch),
            }
        } else {
            Err(Failure::SignedOut)
        };

        guard.armed = false;
        self.settle(mode, outcome).await
    }

    async fn settle(&self, mode: Mode, outcome: Result<IssuedCredential, Failure>) -> RenewOutcome {
        match outcome {
            Ok(issued) => {
                self.store.set(issued.value.clone(), issued.expires_in_secs);
                if let Some(ref slot) = self.slot {
                    if let Err(e) = slot.save(&issued.value) {
                        tracing::warn!(err = %e, "failed to persist fallback credential");
                    }
                }
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                let queue = self.finish();
                tracing::info!(
                    queued = queue.len(),
                    generation,
                    expires_in_secs = issued.expires_in_secs,
                    "credential refreshed"
                );
                self.events.emit(CredentialEvent::Renewed {
                    expires_in_secs: issued.expires_in_secs,
                    generation,
                });
                if !queue.is_empty() {
                    tokio::spawn(replay(Arc::clone(&self.dispatch), queue));
                }
                RenewOutcome::Renewed
            }
            Err(Failure::SignedOut) => {
                self.drop_credential();
                self.generation.fetch_add(1, Ordering::AcqRel);
                let queue = self.finish();
                tracing::info!(queued = queue.len(), "not signed in, credential cleared");
                self.events.emit(CredentialEvent::Cleared);
                fail_all(queue, &ClientError::refresh("not signed in"));
                RenewOutcome::SignedOut
            }
            Err(Failure::Fetch(e)) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                let queue = self.finish();
                let error = format!("{e:#}");
                // A proactive renewal nobody is waiting on keeps the current
                // credential; it may still be valid.
                if mode == Mode::Reactive || !queue.is_empty() {
                    self.drop_credential();
                }
                tracing::warn!(queued = queue.len(), err = %error, "credential refresh failed");
                self.events.emit(CredentialEvent::RefreshFailed { error: error.clone() });
                fail_all(queue, &ClientError::refresh(error));
                RenewOutcome::Failed
            }
        }
    }

    /// Leave `Refreshing`, handing back the queue.
    fn finish(&self) -> Vec<PendingRequest> {
        match std::mem::replace(&mut *self.phase.lock(), Phase::Idle) {
            Phase::Refreshing { queue } => queue,
            Phase::Idle => Vec::new(),
        }
    }

    fn drop_credential(&self) {
        self.store.clear();
        if let Some(ref slot) = self.slot {
            if let Err(e) = slot.clear() {
                tracing::warn!(err = %e, "failed to clear fallback credential");
            }
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("state", &self.state())
            .field("queued", &self.queued())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Replay every waiter with the current credential.
///
/// Dispatches start in queue order; each caller gets its reply as soon as
/// its own replay completes. Callers that went away are skipped.
async fn replay(dispatch: Arc<dyn Dispatch>, queue: Vec<PendingRequest>) {
    let replays = queue.into_iter().map(|PendingRequest { mut request, mut reply }| {
        let dispatch = Arc::clone(&dispatch);
        async move {
            if reply.is_closed() {
                tracing::debug!(request_id = %request.id(), "caller cancelled, not replaying");
                return;
            }
            tracing::debug!(request_id = %request.id(), "replaying");
            tokio::select! {
                result = dispatch.dispatch(&mut request) => {
                    let _ = reply.send(result);
                }
                _ = reply.closed() => {
                    tracing::debug!(request_id = %request.id(), "caller cancelled during replay");
                }
            }
        }
    });
    futures_util::future::join_all(replays).await;
}

fn fail_all(queue: Vec<PendingRequest>, err: &ClientError) {
    for pending in queue {
        let _ = pending.reply.send(Err(err.clone()));
    }
}

/// Returns the coordinator to `Idle` if a refresh unwinds before settling,
/// failing whoever was parked.
struct AbortGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let queue = self.coordinator.finish();
            tracing::warn!(queued = queue.len(), "refresh aborted before settling");
            fail_all(queue, &ClientError::refresh("refresh aborted"));
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
