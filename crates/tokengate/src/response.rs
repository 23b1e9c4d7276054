// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decides what happens to each dispatch outcome.

use std::sync::Arc;

use crate::error::ClientError;
use crate::request::ApiRequest;
use crate::store::TokenStore;
use crate::transport::ApiResponse;

/// Next step for a request after one dispatch.
#[derive(Debug)]
pub enum Verdict {
    /// Hand the outcome to the caller unchanged.
    Deliver(Result<ApiResponse, ClientError>),
    /// The credential was already replaced since this request went out.
    ReplayNow,
    /// Queue behind the in-flight refresh, starting one if idle.
    Refresh,
}

pub struct ResponsePipeline {
    store: Arc<TokenStore>,
}

impl ResponsePipeline {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }

    /// Inspect an outcome. Marks the request retried when routing it to a
    /// refresh or replay, so a second 401 is delivered rather than looped.
    pub fn inspect(
        &self,
        request: &mut ApiRequest,
        outcome: Result<ApiResponse, ClientError>,
    ) -> Verdict {
        let err = match outcome {
            Ok(resp) => return Verdict::Deliver(Ok(resp)),
            Err(err) if !err.kind.triggers_refresh() => return Verdict::Deliver(Err(err)),
            Err(err) => err,
        };

        if request.is_retried() {
            tracing::debug!(request_id = %request.id(), "rejected again after refresh, giving up");
            return Verdict::Deliver(Err(err));
        }
        request.mark_retried();

        let current = self.store.get();
        match current {
            Some(cred) if request.sent_with() != Some(cred.value()) => {
                tracing::debug!(request_id = %request.id(), "credential already replaced, replaying");
                Verdict::ReplayNow
            }
            _ => Verdict::Refresh,
        }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
