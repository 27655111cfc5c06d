//! Connection lifecycle: ties profile resolution, secret lookup and the token
//! broker together and persists the outcome.
//!
//! ```text
//!   Disconnected ──connect()──► Connecting ──ok──► Connected
//!        ▲                          │                 │
//!        │                          └──fatal──► Error ◄┘ refresh_status() fails
//!        └──────────── disconnect() ─────────────────┘
//! ```
//!
//! A secret lookup failure does not fail `connect()`: the connection lands in
//! `Connected` with a soft error and CRM access stays unavailable.

mod status;
mod store;

pub use status::{ConnectionState, ConnectionStatus};
pub use store::StatusStore;

use crate::clock::{Clock, SystemClock};
use crate::cloud::{AwsCli, CloudCli};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::profile::{probe_error, CredentialProfile, ProfileResolver};
use crate::secret::{SecretLocator, SecretRecord};
use crate::token::{AccessToken, CrmCredentials, HttpTokenTransport, TokenBroker, TokenTransport};
use anyhow::Context;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Region used when neither the config nor the profile names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Inputs of a connect cycle, taken from [`BrokerConfig`].
#[derive(Debug, Clone)]
struct ConnectSettings {
    profile: String,
    region: String,
    secret_name: String,
    secret_keywords: Vec<String>,
    login_url: String,
    probe_timeout: Duration,
    workspace: String,
}

impl From<&BrokerConfig> for ConnectSettings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            profile: config.aws.profile.clone(),
            region: config.aws.region.trim().to_string(),
            secret_name: config.secret.name.clone(),
            secret_keywords: config.secret.keywords.clone(),
            login_url: config.crm.login_url.clone(),
            probe_timeout: Duration::from_secs(config.aws.probe_timeout_secs.max(1)),
            workspace: config.storage.workspace.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns one workspace's connection and its token broker.
pub struct ConnectionManager {
    cli: Arc<dyn CloudCli>,
    resolver: ProfileResolver,
    locator: SecretLocator,
    broker: Arc<TokenBroker>,
    store: Arc<StatusStore>,
    clock: Arc<dyn Clock>,
    settings: ConnectSettings,
    status: Mutex<ConnectionStatus>,
    secret: Mutex<Option<SecretRecord>>,
    /// Serializes lifecycle operations; never held by `access_token()`.
    cycle: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: &BrokerConfig,
        cli: Arc<dyn CloudCli>,
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        store: Arc<StatusStore>,
    ) -> Self {
        let broker = Arc::new(TokenBroker::new(
            transport,
            Arc::clone(&clock),
            config.retry.policy(),
            config.crm.token_ttl(),
        ));

        Self {
            resolver: ProfileResolver::with_fallbacks(
                Arc::clone(&cli),
                config.aws.fallback_profiles.clone(),
            ),
            locator: SecretLocator::new(Arc::clone(&cli)),
            cli,
            broker,
            store,
            clock,
            settings: ConnectSettings::from(config),
            status: Mutex::new(ConnectionStatus::default()),
            secret: Mutex::new(None),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds a manager with the production collaborators: the `aws` CLI, a
    /// reqwest token transport, the system clock and the SQLite status store.
    pub fn from_config(config: &BrokerConfig) -> anyhow::Result<Self> {
        let cli = Arc::new(AwsCli::new(config.aws.cli_path.clone()));
        let transport = Arc::new(HttpTokenTransport::new(config.crm.request_timeout())?);
        let store = Arc::new(
            StatusStore::new(&config.storage.path)
                .with_context(|| format!("Failed to open status store {}", config.storage.path))?,
        );

        Ok(Self::new(config, cli, transport, Arc::new(SystemClock), store))
    }

    /// Current in-memory status.
    pub fn status(&self) -> ConnectionStatus {
        lock(&self.status).clone()
    }

    /// Name of the loaded CRM secret, if any.
    pub fn secret_name(&self) -> Option<String> {
        lock(&self.secret).as_ref().map(|s| s.name.clone())
    }

    /// Shared token broker, for consumers that call the CRM API.
    pub fn broker(&self) -> Arc<TokenBroker> {
        Arc::clone(&self.broker)
    }

    /// Runs a full connect cycle.
    pub async fn connect(&self) -> Result<ConnectionStatus, BrokerError> {
        let _cycle = self.cycle.lock().await;
        self.run_connect().await
    }

    /// Explicit refresh: drops everything held and connects again.
    pub async fn reconnect(&self) -> Result<ConnectionStatus, BrokerError> {
        let _cycle = self.cycle.lock().await;
        info!(workspace = %self.settings.workspace, "Reconnecting");
        self.run_connect().await
    }

    /// Re-runs the identity probe for a connected profile. On failure the
    /// connection is demoted to `Error`, held credentials are purged and the
    /// probe error is returned.
    pub async fn refresh_status(&self) -> Result<ConnectionStatus, BrokerError> {
        let _cycle = self.cycle.lock().await;

        let current = self.status();
        if !current.is_connected() {
            return Ok(current);
        }
        let profile = current.profile.clone().unwrap_or_default();

        match self.cli.caller_identity(&profile).await {
            Ok(_) => {
                debug!(profile = %profile, "Identity probe still valid");
                Ok(current)
            }
            Err(failure) => {
                let error = probe_error(&profile, &failure);
                warn!(
                    profile = %profile,
                    error = %error,
                    "Identity probe failed, demoting connection"
                );

                self.purge();
                let demoted = ConnectionStatus {
                    state: ConnectionState::Error,
                    secret_access_ok: false,
                    last_error: Some(error.to_string()),
                    updated_at: Some(self.clock.now()),
                    ..current
                };
                *lock(&self.status) = demoted.clone();
                if let Err(storage) = self.persist(&demoted) {
                    warn!(error = %storage, "Failed to persist demoted status");
                }
                Err(error)
            }
        }
    }

    /// Forgets the connection. Safe to call in any state.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        let _cycle = self.cycle.lock().await;

        self.purge();
        *lock(&self.status) = ConnectionStatus {
            updated_at: Some(self.clock.now()),
            ..Default::default()
        };
        self.store
            .clear(&self.settings.workspace)
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))?;

        info!(workspace = %self.settings.workspace, "Disconnected");
        Ok(())
    }

    /// Loads the persisted status into memory without touching the cloud.
    pub async fn load_persisted(&self) -> Result<ConnectionStatus, BrokerError> {
        let _cycle = self.cycle.lock().await;
        self.restore()
    }

    /// Workspaces with a persisted status in the shared store.
    pub fn known_workspaces(&self) -> Result<Vec<String>, BrokerError> {
        self.store
            .list_workspaces()
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))
    }

    /// Restores the persisted status at startup. A persisted `Connected`
    /// status triggers a fresh connect, since secrets are never stored.
    pub async fn resume(&self) -> Result<ConnectionStatus, BrokerError> {
        let _cycle = self.cycle.lock().await;

        let status = self.restore()?;
        if status.is_connected() {
            info!(workspace = %self.settings.workspace, "Resuming persisted connection");
            return self.run_connect().await;
        }
        Ok(status)
    }

    /// Bearer token for the CRM backend.
    pub async fn access_token(&self) -> Result<String, BrokerError> {
        self.token().await.map(|token| token.value)
    }

    /// Full token, including the instance URL it is valid for.
    pub async fn token(&self) -> Result<AccessToken, BrokerError> {
        if !self.broker.has_credentials() {
            let status = self.status();
            let reason = match (status.state, status.soft_error) {
                (_, Some(soft)) => soft,
                (ConnectionState::Connected, None) => "no CRM credentials loaded".to_string(),
                (state, None) => format!("connection is {:?}", state).to_lowercase(),
            };
            return Err(BrokerError::NotConnected(reason));
        }
        self.broker.get_token().await
    }

    async fn run_connect(&self) -> Result<ConnectionStatus, BrokerError> {
        self.purge();
        lock(&self.status).state = ConnectionState::Connecting;

        let outcome = match self.establish().await {
            Ok(status) => self.persist(&status).map(|()| status),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(status) => {
                *lock(&self.status) = status.clone();
                info!(
                    profile = status.profile.as_deref().unwrap_or(""),
                    account = status.account.as_deref().unwrap_or(""),
                    region = status.region.as_deref().unwrap_or(""),
                    secret_access_ok = status.secret_access_ok,
                    "Connected"
                );
                Ok(status)
            }
            Err(error) => {
                if error.is_fatal() {
                    error!(error = %error, "Connect aborted");
                } else {
                    warn!(error = %error, "Connect failed");
                }
                self.purge();
                let failed = ConnectionStatus {
                    state: ConnectionState::Error,
                    last_error: Some(error.to_string()),
                    updated_at: Some(self.clock.now()),
                    ..Default::default()
                };
                if let Err(storage) = self.persist(&failed) {
                    warn!(error = %storage, "Failed to persist connect failure");
                }
                *lock(&self.status) = failed;
                Err(error)
            }
        }
    }

    async fn establish(&self) -> Result<ConnectionStatus, BrokerError> {
        self.check_tool().await?;

        let resolved = self.resolver.resolve(&self.settings.profile).await?;

        let identity = self
            .cli
            .caller_identity(&resolved.name)
            .await
            .map_err(|f| probe_error(&resolved.name, &f))?;
        if identity.account.is_empty() {
            return Err(BrokerError::Other(format!(
                "identity probe for profile '{}' returned no account id",
                resolved.name
            )));
        }

        let region = self.region_for(&resolved.name).await;
        let session_expiry_estimate = match self.cli.session_expiry(&resolved.name).await {
            Ok(expiry) => expiry,
            Err(e) => {
                debug!(profile = %resolved.name, error = %e, "No session expiry available");
                None
            }
        };

        let profile = CredentialProfile {
            name: resolved.name.clone(),
            region: region.clone(),
        };
        let soft_error = match self.load_secret(&profile).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    profile = %profile.name,
                    error = %e,
                    "CRM secret unavailable, continuing without CRM access"
                );
                Some(e.to_string())
            }
        };

        Ok(ConnectionStatus {
            state: ConnectionState::Connected,
            account: Some(identity.account),
            region: Some(region),
            profile: Some(resolved.name),
            secret_access_ok: soft_error.is_none(),
            session_expiry_estimate,
            soft_error,
            last_error: None,
            updated_at: Some(self.clock.now()),
        })
    }

    async fn check_tool(&self) -> Result<(), BrokerError> {
        let tool = self.cli.tool_name().to_string();
        let timeout = self.settings.probe_timeout;

        match tokio::time::timeout(timeout, self.cli.version()).await {
            Ok(Ok(version)) => {
                debug!(tool = %tool, version = %version, "CLI tool present");
                Ok(())
            }
            Ok(Err(failure)) => Err(BrokerError::ToolMissing {
                tool,
                detail: failure.message,
            }),
            Err(_) => Err(BrokerError::ToolMissing {
                tool,
                detail: format!("`--version` did not answer within {}s", timeout.as_secs()),
            }),
        }
    }

    async fn region_for(&self, profile: &str) -> String {
        if !self.settings.region.is_empty() {
            return self.settings.region.clone();
        }
        match self.cli.configured_region(profile).await {
            Ok(Some(region)) if !region.trim().is_empty() => region.trim().to_string(),
            Ok(_) => DEFAULT_REGION.to_string(),
            Err(e) => {
                debug!(profile = %profile, error = %e, "Could not read profile region");
                DEFAULT_REGION.to_string()
            }
        }
    }

    async fn load_secret(&self, profile: &CredentialProfile) -> Result<(), BrokerError> {
        let record = self
            .locator
            .locate(profile, &self.settings.secret_name, &self.settings.secret_keywords)
            .await?;
        let credentials = CrmCredentials::from_secret(&record, &self.settings.login_url)?;

        self.broker.configure(credentials);
        *lock(&self.secret) = Some(record);
        Ok(())
    }

    fn restore(&self) -> Result<ConnectionStatus, BrokerError> {
        let stored = self
            .store
            .load(&self.settings.workspace)
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))?;

        if let Some(status) = stored {
            debug!(
                workspace = %self.settings.workspace,
                state = ?status.state,
                "Loaded persisted status"
            );
            *lock(&self.status) = status;
        }
        Ok(self.status())
    }

    fn purge(&self) {
        self.broker.clear();
        lock(&self.secret).take();
    }

    fn persist(&self, status: &ConnectionStatus) -> Result<(), BrokerError> {
        self.store
            .save(&self.settings.workspace, status)
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cloud::{CallerIdentity, CliFailure};
    use crate::token::{TokenFailure, TokenGrant};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const FULL: &str = r#"{"username":"a","password":"b","client_id":"c","client_secret":"d"}"#;

    /// Fake CLI with one working profile and a fixed secret shelf.
    struct Sandbox {
        profile: &'static str,
        region: Option<&'static str>,
        secrets: Vec<(&'static str, &'static str)>,
        session_valid: AtomicBool,
        probes: AtomicUsize,
    }

    impl Sandbox {
        fn new(profile: &'static str, secrets: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                profile,
                region: Some("eu-west-1"),
                secrets,
                session_valid: AtomicBool::new(true),
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CloudCli for Sandbox {
        fn tool_name(&self) -> &str {
            "aws"
        }
        async fn version(&self) -> Result<String, CliFailure> {
            Ok("aws-cli/2.15.0".to_string())
        }
        async fn caller_identity(&self, profile: &str) -> Result<CallerIdentity, CliFailure> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if profile != self.profile {
                return Err(CliFailure::new(format!(
                    "The config profile ({}) could not be found",
                    profile
                )));
            }
            if !self.session_valid.load(Ordering::SeqCst) {
                return Err(CliFailure::new(
                    "Error loading SSO Token: Token for sso expired",
                ));
            }
            Ok(CallerIdentity {
                account: "123456789012".to_string(),
                arn: "arn:aws:iam::123456789012:user/ops".to_string(),
                user_id: "AIDA".to_string(),
            })
        }
        async fn configured_region(&self, _: &str) -> Result<Option<String>, CliFailure> {
            Ok(self.region.map(str::to_string))
        }
        async fn session_expiry(&self, _: &str) -> Result<Option<DateTime<Utc>>, CliFailure> {
            Err(CliFailure::new("export-credentials not supported"))
        }
        async fn list_secret_names(&self, _: &str, _: &str) -> Result<Vec<String>, CliFailure> {
            Ok(self.secrets.iter().map(|(n, _)| n.to_string()).collect())
        }
        async fn secret_string(&self, _: &str, _: &str, name: &str) -> Result<String, CliFailure> {
            self.secrets
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, p)| p.to_string())
                .ok_or_else(|| CliFailure::new("ResourceNotFoundException"))
        }
    }

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenTransport for CountingTransport {
        async fn request_token(&self, _: &CrmCredentials) -> Result<TokenGrant, TokenFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenGrant {
                access_token: format!("token-{}", call),
                instance_url: "https://na1.example.com".to_string(),
                issued_at: None,
                token_type: None,
            })
        }
    }

    fn setup(cli: Arc<Sandbox>, config: BrokerConfig) -> (ConnectionManager, Arc<StatusStore>) {
        let store = Arc::new(StatusStore::new(":memory:").unwrap());
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let manager = ConnectionManager::new(
            &config,
            cli,
            transport,
            Arc::new(ManualClock::new(Utc::now())),
            Arc::clone(&store),
        );
        (manager, store)
    }

    fn config() -> BrokerConfig {
        let mut config = BrokerConfig::default();
        config.aws.profile = "default".to_string();
        config.secret.name = "crm".to_string();
        config
    }

    #[tokio::test]
    async fn test_connect_with_fallback_profile() {
        let cli = Arc::new(Sandbox::new("dev", vec![("crm", FULL)]));
        let (manager, store) = setup(cli, config());

        let status = manager.connect().await.unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.profile.as_deref(), Some("dev"));
        assert_eq!(status.account.as_deref(), Some("123456789012"));
        assert_eq!(status.region.as_deref(), Some("eu-west-1"));
        assert!(status.secret_access_ok);
        assert!(status.session_expiry_estimate.is_none());
        assert!(status.is_consistent());

        assert_eq!(store.load("default").unwrap(), Some(status));
        assert_eq!(manager.secret_name().as_deref(), Some("crm"));
        assert_eq!(manager.access_token().await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn test_region_precedence() {
        let mut with_region = config();
        with_region.aws.region = "ap-south-1".to_string();
        let (manager, _) = setup(Arc::new(Sandbox::new("default", vec![])), with_region);
        let status = manager.connect().await.unwrap();
        assert_eq!(status.region.as_deref(), Some("ap-south-1"));

        let mut cli = Sandbox::new("default", vec![]);
        cli.region = None;
        let (manager, _) = setup(Arc::new(cli), config());
        let status = manager.connect().await.unwrap();
        assert_eq!(status.region.as_deref(), Some(DEFAULT_REGION));
    }

    #[tokio::test]
    async fn test_missing_secret_is_soft_error() {
        let cli = Arc::new(Sandbox::new("default", vec![("unrelated", FULL)]));
        let (manager, _) = setup(cli, config());

        let status = manager.connect().await.unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(!status.secret_access_ok);
        let soft = status.soft_error.clone().unwrap();
        assert!(soft.contains("no secret matches 'crm'"));

        match manager.access_token().await {
            Err(BrokerError::NotConnected(reason)) => assert_eq!(reason, soft),
            other => panic!("expected NotConnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_profile_puts_connection_in_error() {
        let cli = Arc::new(Sandbox::new("elsewhere", vec![]));
        let (manager, store) = setup(cli, config());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::CredentialsMissing { .. }));

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.last_error.is_some());
        assert_eq!(store.load("default").unwrap().unwrap().state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_refresh_status_demotes_on_expired_session() {
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let (manager, store) = setup(Arc::clone(&cli), config());
        manager.connect().await.unwrap();
        manager.access_token().await.unwrap();

        // Still valid: nothing changes
        let status = manager.refresh_status().await.unwrap();
        assert!(status.is_connected());

        cli.session_valid.store(false, Ordering::SeqCst);
        let err = manager.refresh_status().await.unwrap_err();
        assert!(matches!(err, BrokerError::ExpiredSession { .. }));

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.profile.as_deref(), Some("default"));
        assert!(manager.secret_name().is_none());
        assert!(!manager.broker().has_credentials());
        assert_eq!(store.load("default").unwrap().unwrap().state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_refresh_status_when_disconnected_is_noop() {
        let cli = Arc::new(Sandbox::new("default", vec![]));
        let (manager, _) = setup(Arc::clone(&cli), config());

        let status = manager.refresh_status().await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(cli.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let (manager, store) = setup(cli, config());
        manager.connect().await.unwrap();

        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();

        assert_eq!(manager.status().state, ConnectionState::Disconnected);
        assert!(store.load("default").unwrap().is_none());
        assert!(matches!(
            manager.access_token().await,
            Err(BrokerError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_issues_fresh_token() {
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let (manager, _) = setup(cli, config());
        manager.connect().await.unwrap();
        assert_eq!(manager.access_token().await.unwrap(), "token-1");
        assert_eq!(manager.access_token().await.unwrap(), "token-1");

        manager.reconnect().await.unwrap();
        assert_eq!(manager.access_token().await.unwrap(), "token-2");
    }

    fn on_disk(cli: Arc<Sandbox>, path: &std::path::Path) -> ConnectionManager {
        let store = Arc::new(StatusStore::new(path).unwrap());
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        ConnectionManager::new(
            &config(),
            cli,
            transport,
            Arc::new(ManualClock::new(Utc::now())),
            store,
        )
    }

    fn break_store(path: &std::path::Path) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute("DROP TABLE connection_status", []).unwrap();
    }

    #[tokio::test]
    async fn test_connect_storage_failure_leaves_nothing_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let manager = on_disk(cli, &path);
        break_store(&path);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Storage(_)));

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.is_consistent());
        assert!(manager.secret_name().is_none());
        assert!(!manager.broker().has_credentials());
        assert!(matches!(
            manager.access_token().await,
            Err(BrokerError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_status_demotes_even_when_storage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let manager = on_disk(Arc::clone(&cli), &path);
        manager.connect().await.unwrap();
        assert!(manager.broker().has_credentials());

        break_store(&path);
        cli.session_valid.store(false, Ordering::SeqCst);
        let err = manager.refresh_status().await.unwrap_err();
        assert!(matches!(err, BrokerError::ExpiredSession { .. }));

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.is_consistent());
        assert!(!manager.broker().has_credentials());
    }

    #[tokio::test]
    async fn test_known_workspaces_lists_persisted_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");
        let cli = Arc::new(Sandbox::new("default", vec![("crm", FULL)]));
        let manager = on_disk(Arc::clone(&cli), &path);
        assert!(manager.known_workspaces().unwrap().is_empty());

        manager.connect().await.unwrap();
        let mut other = config();
        other.storage.workspace = "analytics".to_string();
        let second = ConnectionManager::new(
            &other,
            cli,
            Arc::new(CountingTransport {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(StatusStore::new(&path).unwrap()),
        );
        second.connect().await.unwrap();

        assert_eq!(manager.known_workspaces().unwrap(), vec!["analytics", "default"]);
    }
}
