//! Credential profile resolution.
//!
//! Walks a fixed, deduplicated candidate list (`configured`, then the
//! fallbacks) and returns the first profile whose identity probe succeeds.
//! The candidate list is the only retry mechanism: every candidate is probed
//! at most once per resolution.

use crate::cloud::{CliFailure, CloudCli};
use crate::error::BrokerError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Profiles tried after the configured one, in order.
pub const FALLBACK_PROFILES: [&str; 3] = ["default", "development", "dev"];

/// Substrings (lowercase) the CLI prints when a cached session token is no
/// longer accepted.
const EXPIRED_SESSION_MARKERS: &[&str] = &[
    "expiredtoken",
    "token has expired",
    "token is expired",
    "session has expired",
    "sso session",
    "security token included in the request is invalid",
    "security token included in the request is expired",
    "invalidclienttokenid",
    "error loading sso token",
    "refresh failed",
];

/// Why a single identity probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailureKind {
    ExpiredSession,
    CredentialsMissing,
}

/// Classifies an identity probe failure message.
pub fn classify_probe_failure(message: &str) -> ProbeFailureKind {
    let lowered = message.to_lowercase();
    if EXPIRED_SESSION_MARKERS.iter().any(|m| lowered.contains(m)) {
        ProbeFailureKind::ExpiredSession
    } else {
        ProbeFailureKind::CredentialsMissing
    }
}

/// Maps a failed probe against a single profile onto the error taxonomy.
pub fn probe_error(profile: &str, failure: &CliFailure) -> BrokerError {
    match classify_probe_failure(&failure.message) {
        ProbeFailureKind::ExpiredSession => BrokerError::ExpiredSession {
            profiles: vec![profile.to_string()],
            detail: failure.message.clone(),
        },
        ProbeFailureKind::CredentialsMissing => BrokerError::CredentialsMissing {
            tried: vec![profile.to_string()],
        },
    }
}

/// A named profile plus the region operations are scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialProfile {
    pub name: String,
    /// Empty means "whatever the profile defaults to".
    pub region: String,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: String,
    /// Set when a configured profile was given but a fallback answered.
    pub warning: bool,
}

pub struct ProfileResolver {
    cli: Arc<dyn CloudCli>,
    fallbacks: Vec<String>,
}

impl ProfileResolver {
    pub fn new(cli: Arc<dyn CloudCli>) -> Self {
        Self::with_fallbacks(cli, FALLBACK_PROFILES.iter().map(|p| p.to_string()).collect())
    }

    pub fn with_fallbacks(cli: Arc<dyn CloudCli>, fallbacks: Vec<String>) -> Self {
        Self { cli, fallbacks }
    }

    /// Ordered, deduplicated candidates for `configured`.
    pub fn candidates(&self, configured: &str) -> Vec<String> {
        let configured = configured.trim();
        let mut candidates: Vec<String> = Vec::with_capacity(self.fallbacks.len() + 1);

        let head = (!configured.is_empty()).then_some(configured);
        for name in head.into_iter().chain(self.fallbacks.iter().map(String::as_str)) {
            let name = name.trim();
            if !name.is_empty() && !candidates.iter().any(|c| c == name) {
                candidates.push(name.to_string());
            }
        }

        candidates
    }

    /// Returns the first candidate whose identity probe succeeds.
    pub async fn resolve(&self, configured: &str) -> Result<ResolvedProfile, BrokerError> {
        let candidates = self.candidates(configured);
        let mut expired: Vec<String> = Vec::new();
        let mut expired_detail = String::new();

        for candidate in &candidates {
            debug!(profile = %candidate, "Probing credential profile");

            match self.cli.caller_identity(candidate).await {
                Ok(_) => {
                    let configured = configured.trim();
                    let warning = !configured.is_empty() && candidate != configured;
                    if warning {
                        warn!(
                            configured = %configured,
                            profile = %candidate,
                            "Configured profile unusable, using fallback"
                        );
                    } else {
                        info!(profile = %candidate, "Credential profile resolved");
                    }
                    return Ok(ResolvedProfile {
                        name: candidate.clone(),
                        warning,
                    });
                }
                Err(failure) => {
                    let kind = classify_probe_failure(&failure.message);
                    debug!(
                        profile = %candidate,
                        kind = ?kind,
                        error = %failure,
                        "Profile probe failed"
                    );
                    if kind == ProbeFailureKind::ExpiredSession {
                        if expired.is_empty() {
                            expired_detail = failure.message.clone();
                        }
                        expired.push(candidate.clone());
                    }
                }
            }
        }

        if expired.is_empty() {
            Err(BrokerError::CredentialsMissing { tried: candidates })
        } else {
            Err(BrokerError::ExpiredSession {
                profiles: expired,
                detail: expired_detail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CallerIdentity;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const MISSING: &str = "The config profile (default) could not be found";
    const EXPIRED: &str =
        "An error occurred (ExpiredToken) when calling the GetCallerIdentity operation: The security token included in the request is expired";

    /// Fake CLI answering identity probes from a per-profile table.
    struct ProbeTable {
        answers: HashMap<String, Result<(), String>>,
        probed: Mutex<Vec<String>>,
    }

    impl ProbeTable {
        fn new(answers: &[(&str, Result<(), &str>)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(p, r)| (p.to_string(), r.map_err(|e| e.to_string())))
                    .collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CloudCli for ProbeTable {
        fn tool_name(&self) -> &str {
            "fake"
        }
        async fn version(&self) -> Result<String, CliFailure> {
            Ok("fake/1.0".to_string())
        }
        async fn caller_identity(&self, profile: &str) -> Result<CallerIdentity, CliFailure> {
            self.probed.lock().unwrap().push(profile.to_string());
            match self.answers.get(profile) {
                Some(Ok(())) => Ok(CallerIdentity {
                    account: "123456789012".to_string(),
                    arn: String::new(),
                    user_id: String::new(),
                }),
                Some(Err(message)) => Err(CliFailure::new(message.clone())),
                None => Err(CliFailure::new(format!(
                    "The config profile ({}) could not be found",
                    profile
                ))),
            }
        }
        async fn configured_region(&self, _: &str) -> Result<Option<String>, CliFailure> {
            Ok(None)
        }
        async fn session_expiry(&self, _: &str) -> Result<Option<DateTime<Utc>>, CliFailure> {
            Ok(None)
        }
        async fn list_secret_names(&self, _: &str, _: &str) -> Result<Vec<String>, CliFailure> {
            Ok(vec![])
        }
        async fn secret_string(&self, _: &str, _: &str, _: &str) -> Result<String, CliFailure> {
            Err(CliFailure::new("unused"))
        }
    }

    #[test]
    fn test_classify_expired_session() {
        assert_eq!(classify_probe_failure(EXPIRED), ProbeFailureKind::ExpiredSession);
        assert_eq!(
            classify_probe_failure(
                "Error when retrieving token from sso: Token has expired and refresh failed"
            ),
            ProbeFailureKind::ExpiredSession
        );
        assert_eq!(
            classify_probe_failure("The SSO session associated with this profile has expired"),
            ProbeFailureKind::ExpiredSession
        );
    }

    #[test]
    fn test_classify_missing_credentials() {
        assert_eq!(classify_probe_failure(MISSING), ProbeFailureKind::CredentialsMissing);
        assert_eq!(
            classify_probe_failure("Unable to locate credentials"),
            ProbeFailureKind::CredentialsMissing
        );
        assert_eq!(classify_probe_failure(""), ProbeFailureKind::CredentialsMissing);
    }

    #[test]
    fn test_candidates_deduplicated_in_order() {
        let resolver = ProfileResolver::new(Arc::new(ProbeTable::new(&[])));

        assert_eq!(
            resolver.candidates("work"),
            vec!["work", "default", "development", "dev"]
        );
        assert_eq!(resolver.candidates("dev"), vec!["dev", "default", "development"]);
        assert_eq!(resolver.candidates("  "), vec!["default", "development", "dev"]);
    }

    #[tokio::test]
    async fn test_fallback_to_dev_sets_warning() {
        let cli = Arc::new(ProbeTable::new(&[("default", Err(MISSING)), ("dev", Ok(()))]));
        let resolver = ProfileResolver::new(cli.clone());

        let resolved = resolver.resolve("default").await.unwrap();
        assert_eq!(
            resolved,
            ResolvedProfile {
                name: "dev".to_string(),
                warning: true
            }
        );
        assert_eq!(cli.probed(), vec!["default", "development", "dev"]);
    }

    #[tokio::test]
    async fn test_configured_profile_wins_without_warning() {
        let cli = Arc::new(ProbeTable::new(&[("work", Ok(())), ("default", Ok(()))]));
        let resolver = ProfileResolver::new(cli.clone());

        let resolved = resolver.resolve("work").await.unwrap();
        assert_eq!(resolved.name, "work");
        assert!(!resolved.warning);
        assert_eq!(cli.probed(), vec!["work"]);
    }

    #[tokio::test]
    async fn test_no_configured_profile_uses_default_quietly() {
        let cli = Arc::new(ProbeTable::new(&[("default", Ok(()))]));
        let resolver = ProfileResolver::new(cli);

        let resolved = resolver.resolve("").await.unwrap();
        assert_eq!(resolved.name, "default");
        assert!(!resolved.warning);
    }

    #[tokio::test]
    async fn test_expired_session_beats_missing_credentials() {
        let cli = Arc::new(ProbeTable::new(&[
            ("work", Err(MISSING)),
            ("default", Err(EXPIRED)),
            ("development", Err(MISSING)),
            ("dev", Err(MISSING)),
        ]));
        let resolver = ProfileResolver::new(cli);

        match resolver.resolve("work").await {
            Err(BrokerError::ExpiredSession { profiles, detail }) => {
                assert_eq!(profiles, vec!["default"]);
                assert!(detail.contains("ExpiredToken"));
            }
            other => panic!("expected ExpiredSession, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_missing_lists_tried_candidates() {
        let resolver = ProfileResolver::new(Arc::new(ProbeTable::new(&[])));

        match resolver.resolve("work").await {
            Err(BrokerError::CredentialsMissing { tried }) => {
                assert_eq!(tried, vec!["work", "default", "development", "dev"]);
            }
            other => panic!("expected CredentialsMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_error_maps_single_profile() {
        let err = probe_error("dev", &CliFailure::new(EXPIRED));
        assert!(matches!(err, BrokerError::ExpiredSession { .. }));

        let err = probe_error("dev", &CliFailure::new(MISSING));
        assert_eq!(
            err,
            BrokerError::CredentialsMissing {
                tried: vec!["dev".to_string()]
            }
        );
    }
}
