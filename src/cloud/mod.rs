//! Access to the cloud secret store through the locally installed CLI.
//!
//! The broker never talks to the secret store's API directly: every call goes
//! through a [`CloudCli`] scoped to a named credential profile, so whatever
//! the host has configured (static keys, SSO sessions, assumed roles) is used
//! as-is. [`AwsCli`] shells out to `aws`; tests substitute fakes.

mod aws;

pub use aws::AwsCli;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// A failed CLI invocation. The message is what the tool printed on stderr,
/// which is what the failure classifiers look at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CliFailure {
    pub message: String,
    /// True when the executable itself could not be started.
    pub not_installed: bool,
}

impl CliFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            not_installed: false,
        }
    }

    pub fn not_installed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            not_installed: true,
        }
    }
}

/// Result of the "who am I" identity probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallerIdentity {
    #[serde(rename = "Account", default)]
    pub account: String,
    #[serde(rename = "Arn", default)]
    pub arn: String,
    #[serde(rename = "UserId", default)]
    pub user_id: String,
}

/// Operations the broker needs from the cloud CLI.
#[async_trait]
pub trait CloudCli: Send + Sync {
    /// Executable name, for diagnostics.
    fn tool_name(&self) -> &str;

    /// Cheap presence check (`--version`).
    async fn version(&self) -> Result<String, CliFailure>;

    /// Stateless identity probe scoped to `profile`.
    async fn caller_identity(&self, profile: &str) -> Result<CallerIdentity, CliFailure>;

    /// Region configured for `profile`, if any.
    async fn configured_region(&self, profile: &str) -> Result<Option<String>, CliFailure>;

    /// Expiry of the session credentials behind `profile`, if they expire.
    async fn session_expiry(&self, profile: &str) -> Result<Option<DateTime<Utc>>, CliFailure>;

    /// Names of every secret visible to `profile` in `region`, in store order.
    async fn list_secret_names(&self, profile: &str, region: &str)
        -> Result<Vec<String>, CliFailure>;

    /// Raw string payload of one secret.
    async fn secret_string(
        &self,
        profile: &str,
        region: &str,
        name: &str,
    ) -> Result<String, CliFailure>;
}
