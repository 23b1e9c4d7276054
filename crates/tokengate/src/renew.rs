// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background renewer: re-acquires the credential on a fixed interval and
//! immediately after it is invalidated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::CredentialEvent;
use crate::refresh::{RefreshCoordinator, RenewOutcome};

/// Spawn the renewal loop.
///
/// The first timer tick fires at `first_tick`, then every `interval`. An
/// invalidation triggers a renewal unless a refresh has settled since it was
/// emitted. After a sign-out every attempt finds the caller signed out and
/// clears the store. Failures are logged and the loop keeps running.
pub fn spawn_renewer(
    coordinator: Arc<RefreshCoordinator>,
    mut event_rx: broadcast::Receiver<CredentialEvent>,
    interval: Duration,
    first_tick: tokio::time::Instant,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(first_tick, interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    tracing::debug!("scheduled credential renewal");
                    log_outcome(coordinator.renew().await);
                }
                event = event_rx.recv() => match event {
                    Ok(CredentialEvent::Invalidated { reason, generation }) => {
                        if coordinator.generation() > generation {
                            tracing::debug!(?reason, generation, "invalidation already handled");
                            continue;
                        }
                        tracing::debug!(?reason, generation, "renewing after invalidation");
                        log_outcome(coordinator.renew().await);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "renewer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("renewer stopped");
    })
}

fn log_outcome(outcome: RenewOutcome) {
    match outcome {
        RenewOutcome::Renewed => {}
        RenewOutcome::Coalesced => tracing::debug!("renewal joined in-flight refresh"),
        RenewOutcome::SignedOut => tracing::debug!("renewal skipped, not signed in"),
        RenewOutcome::Failed => tracing::debug!("renewal failed, will retry next interval"),
    }
}

#[cfg(test)]
#[path = "renew_tests.rs"]
mod tests;
