// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes surfaced by the authenticated client.
///
/// Decided once at the transport boundary. Only [`ErrorKind::AuthorizationFailure`]
/// ever touches refresh state; every other class passes straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The caller aborted the request.
    Cancelled,
    /// The server rejected the credential (401).
    AuthorizationFailure,
    /// Authenticated but not permitted (403).
    Forbidden,
    /// 5xx-class failure.
    ServerFailure,
    /// Any other non-success status (400, 404, 409, ...).
    RequestFailure,
    /// Connect, timeout, or body read errors.
    TransportFailure,
    /// The refresh procedure could not obtain a new credential.
    RefreshFailure,
}

impl ErrorKind {
    /// Classify a non-success HTTP status. Returns `None` for 1xx-3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::AuthorizationFailure),
            403 => Some(Self::Forbidden),
            500..=599 => Some(Self::ServerFailure),
            400..=499 => Some(Self::RequestFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::AuthorizationFailure => "AUTHORIZATION_FAILURE",
            Self::Forbidden => "FORBIDDEN",
            Self::ServerFailure => "SERVER_FAILURE",
            Self::RequestFailure => "REQUEST_FAILURE",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::RefreshFailure => "REFRESH_FAILURE",
        }
    }

    /// Whether this failure should route through the refresh protocol.
    pub fn triggers_refresh(&self) -> bool {
        matches!(self, Self::AuthorizationFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned to callers of [`crate::client::AuthClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub kind: ErrorKind,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, message: message.into() }
    }

    /// Build from a non-success response status and body text.
    ///
    /// Callers must only pass statuses for which [`ErrorKind::from_status`]
    /// returns `Some`; anything else is reported as a request failure.
    pub fn from_response(status: u16, body: &str) -> Self {
        let kind = ErrorKind::from_status(status).unwrap_or(ErrorKind::RequestFailure);
        let message = if body.is_empty() { format!("HTTP {status}") } else { truncate(body, 512) };
        Self { kind, status: Some(status), message }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled by caller")
    }

    pub fn transport(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self { kind: ErrorKind::TransportFailure, status: err.status().map(|s| s.as_u16()), message }
    }

    pub fn refresh(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RefreshFailure, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ClientError {}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
