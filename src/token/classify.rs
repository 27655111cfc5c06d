//! Failure routing for token requests.
//!
//! The retry policy only ever looks at a [`FailureKind`]. This file is the one
//! place message text is inspected to produce it.

use std::fmt;

/// How a failed token request should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend rejected the grant; retried once immediately after clearing
    /// the cache.
    Auth,
    /// Transport problem; retried with backoff.
    Network,
    /// Anything else; never retried.
    Other,
}

const AUTH_MARKERS: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "401",
    "unauthorized",
    "authentication failure",
];

const NETWORK_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "econnreset",
    "enotfound",
    "econnrefused",
    "connection reset",
    "connection refused",
    "dns error",
    "fetch failed",
    "error sending request",
];

/// Classifies a failure message. Case-insensitive; auth markers win.
pub fn classify_failure(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        FailureKind::Auth
    } else if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        FailureKind::Network
    } else {
        FailureKind::Other
    }
}

/// A failed token request, classified once where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TokenFailure {
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_failure(&message),
            message,
        }
    }
}

impl fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TokenFailure {}
