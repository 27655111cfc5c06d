//! Error taxonomy shared by profile resolution, secret lookup and token
//! acquisition.
//!
//! Every variant carries enough context to render a distinct remediation
//! message (see [`BrokerError::remediation`]). The type is `Clone` because a
//! single token acquisition result is handed to every caller that joined it.

use thiserror::Error;

/// Failures surfaced by the broker core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The cloud CLI could not be executed at all. Fatal, never retried.
    #[error("`{tool}` is not available: {detail}")]
    ToolMissing { tool: String, detail: String },

    /// No candidate profile produced a working identity.
    #[error("no usable credential profile (tried: {})", .tried.join(", "))]
    CredentialsMissing { tried: Vec<String> },

    /// At least one candidate profile exists but its session has expired.
    #[error("session expired for profile {}: {detail}", .profiles.join(", "))]
    ExpiredSession { profiles: Vec<String>, detail: String },

    /// No listed secret matched the configured name or any keyword.
    #[error(
        "no secret matches '{tried_name}' or keywords [{}] (visible: [{}])",
        .keywords.join(", "),
        .available.join(", ")
    )]
    SecretNotFound {
        tried_name: String,
        keywords: Vec<String>,
        available: Vec<String>,
    },

    /// A secret matched but lacks required fields. Only field names are kept.
    #[error(
        "secret '{secret}' is missing required fields [{}] (present: [{}])",
        .missing.join(", "),
        .present.join(", ")
    )]
    SecretSchema {
        secret: String,
        missing: Vec<String>,
        present: Vec<String>,
    },

    /// The CRM backend rejected the credentials.
    #[error("authentication failed after {attempts} attempt(s): {last_cause}")]
    Auth { attempts: u32, last_cause: String },

    /// Transient transport failure that outlasted the retry budget.
    #[error("network failure after {attempts} attempt(s): {last_cause}")]
    Network { attempts: u32, last_cause: String },

    /// Anything else (malformed responses, unparsable payloads).
    #[error("{0}")]
    Other(String),

    /// A token was requested while no CRM credentials are loaded.
    #[error("CRM access unavailable: {0}")]
    NotConnected(String),

    /// The connection status could not be read or written.
    #[error("status storage failed: {0}")]
    Storage(String),
}

impl BrokerError {
    /// User-facing remediation copy for this failure.
    pub fn remediation(&self) -> String {
        match self {
            BrokerError::ToolMissing { tool, .. } => format!(
                "Install the AWS CLI v2 and make sure `{}` is on your PATH (or set aws.cli_path).",
                tool
            ),
            BrokerError::CredentialsMissing { .. } => {
                "Configure your CLI profile: run `aws configure --profile <name>` or \
                 `aws configure sso`, then set aws.profile to that name."
                    .to_string()
            }
            BrokerError::ExpiredSession { profiles, .. } => {
                let profile = profiles.first().map(String::as_str).unwrap_or("default");
                format!(
                    "Refresh your session: run `aws sso login --profile {}` and reconnect.",
                    profile
                )
            }
            BrokerError::SecretNotFound { available, .. } => {
                if available.is_empty() {
                    "No secrets are visible to this profile/region. Create the CRM secret or \
                     check aws.region."
                        .to_string()
                } else {
                    format!(
                        "Set secret.name or secret.keywords to match one of: {}",
                        available.join(", ")
                    )
                }
            }
            BrokerError::SecretSchema {
                secret, missing, ..
            } => format!(
                "Add the missing field(s) {} to secret '{}'.",
                missing.join(", "),
                secret
            ),
            BrokerError::Auth { .. } => {
                "Check the CRM username, password, security token and connected-app client \
                 credentials stored in the secret."
                    .to_string()
            }
            BrokerError::Network { .. } => {
                "Check connectivity to the CRM login host and try again.".to_string()
            }
            BrokerError::Other(_) => {
                "Re-run with RUST_LOG=credbroker=debug for details.".to_string()
            }
            BrokerError::NotConnected(_) => {
                "Run `credbroker connect` and make sure the CRM secret is found.".to_string()
            }
            BrokerError::Storage(_) => {
                "Check that the status database path (storage.path) is writable.".to_string()
            }
        }
    }

    /// True when the failure should abort a connect cycle outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::ToolMissing { .. })
    }
}
