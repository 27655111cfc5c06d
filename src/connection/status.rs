//! Persisted connection status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Status record surviving process restarts. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub secret_access_ok: bool,
    #[serde(default)]
    pub session_expiry_estimate: Option<DateTime<Utc>>,
    /// Non-fatal failure recorded during the last connect (CRM degraded).
    #[serde(default)]
    pub soft_error: Option<String>,
    /// Fatal failure that put the connection in `Error`.
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// `Connected` requires a profile and an account.
    pub fn is_consistent(&self) -> bool {
        if self.state != ConnectionState::Connected {
            return true;
        }
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        filled(&self.profile) && filled(&self.account)
    }
}
