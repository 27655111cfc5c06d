//! CRM access token broker.
//!
//! Hands out a bearer token for the CRM backend, acquiring it with the OAuth2
//! password grant only when needed:
//!
//! ```text
//!   get_access_token()
//!          │
//!          ▼
//!   cached & unexpired? ──yes──► return cached
//!          │ no
//!          ▼
//!   acquisition in flight? ──yes──► await the same shared future
//!          │ no
//!          ▼
//!   register shared future (same lock as the cache check)
//!          │
//!          ▼
//!   Requesting ──Auth (attempt 1)──► clear cache, retry now
//!          │    ──Network──────────► sleep(backoff + jitter), retry
//!          │    ──Other / budget───► fail
//!          ▼
//!   Success: populate cache, drop in-flight entry
//! ```
//!
//! All shared state sits behind one short-lived mutex that is never held
//! across an `.await`.

mod classify;
mod exchange;
mod retry;

pub use classify::{classify_failure, FailureKind, TokenFailure};
pub use exchange::{
    describe_error_body, grant_form, HttpTokenTransport, TokenGrant, TokenTransport, TOKEN_PATH,
};
pub use retry::RetryPolicy;

use crate::clock::Clock;
use crate::error::BrokerError;
use crate::secret::SecretRecord;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Dedup key for the single token type this broker hands out.
pub const TOKEN_DEDUP_KEY: &str = "crm-access-token";

/// Default lifetime assumed for an access token.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 30 * 60;

/// An issued bearer token. Immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    /// API host the token is valid for.
    pub instance_url: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl AccessToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + self.ttl
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Password-grant credentials taken from the CRM secret.
#[derive(Clone)]
pub struct CrmCredentials {
    pub login_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: Option<String>,
}

impl CrmCredentials {
    /// Builds credentials from a schema-valid secret. A `login_url` field in
    /// the secret overrides `default_login_url`.
    pub fn from_secret(
        record: &SecretRecord,
        default_login_url: &str,
    ) -> Result<Self, BrokerError> {
        let required = |key: &str| -> Result<String, BrokerError> {
            record
                .field(key)
                .map(str::to_string)
                .ok_or_else(|| BrokerError::SecretSchema {
                    secret: record.name.clone(),
                    missing: vec![key.to_string()],
                    present: record.fields().keys().cloned().collect(),
                })
        };
        let optional = |key: &str| record.field(key).filter(|v| !v.is_empty()).map(str::to_string);

        Ok(Self {
            login_url: optional("login_url").unwrap_or_else(|| default_login_url.to_string()),
            client_id: required("client_id")?,
            client_secret: required("client_secret")?,
            username: required("username")?,
            password: required("password")?,
            security_token: optional("security_token"),
        })
    }
}

impl fmt::Debug for CrmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmCredentials")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

type Acquisition = Shared<BoxFuture<'static, Result<AccessToken, BrokerError>>>;

#[derive(Default)]
struct BrokerState {
    cached: Option<AccessToken>,
    credentials: Option<Arc<CrmCredentials>>,
    in_flight: HashMap<&'static str, Acquisition>,
    /// Bumped whenever credentials change or the broker is cleared; a
    /// settling acquisition from an older generation leaves state alone.
    generation: u64,
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Caching, single-flight token source for the CRM backend.
pub struct TokenBroker {
    transport: Arc<dyn TokenTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    ttl: Duration,
    state: Arc<Mutex<BrokerState>>,
}

impl TokenBroker {
    pub fn new(
        transport: Arc<dyn TokenTransport>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
            ttl,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// Installs new credentials, discarding any token issued for the old ones.
    pub fn configure(&self, credentials: CrmCredentials) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.cached = None;
        state.in_flight.clear();
        state.credentials = Some(Arc::new(credentials));
        debug!(generation = state.generation, "Token broker configured");
    }

    /// Drops the cached token. Credentials and in-flight requests stay.
    pub fn invalidate(&self) {
        if lock(&self.state).cached.take().is_some() {
            debug!("Cached access token invalidated");
        }
    }

    /// Forgets everything: token, credentials and pending acquisitions.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.cached = None;
        state.credentials = None;
        state.in_flight.clear();
    }

    pub fn has_credentials(&self) -> bool {
        lock(&self.state).credentials.is_some()
    }

    /// Returns the bearer token value.
    pub async fn get_access_token(&self) -> Result<String, BrokerError> {
        self.get_token().await.map(|token| token.value)
    }

    /// Returns the full token, acquiring one if the cache is empty or expired.
    pub async fn get_token(&self) -> Result<AccessToken, BrokerError> {
        let acquisition = {
            let mut state = lock(&self.state);

            if let Some(token) = &state.cached {
                if !token.is_expired_at(self.clock.now()) {
                    return Ok(token.clone());
                }
                debug!(expired_at = %token.expires_at(), "Cached access token expired");
                state.cached = None;
            }

            match state.in_flight.get(TOKEN_DEDUP_KEY) {
                Some(pending) => {
                    debug!("Joining in-flight token acquisition");
                    pending.clone()
                }
                None => {
                    let credentials = state.credentials.clone().ok_or_else(|| {
                        BrokerError::NotConnected("no CRM credentials loaded".to_string())
                    })?;
                    let pending = self.start_acquisition(credentials, state.generation);
                    state.in_flight.insert(TOKEN_DEDUP_KEY, pending.clone());
                    pending
                }
            }
        };

        acquisition.await
    }

    fn start_acquisition(&self, credentials: Arc<CrmCredentials>, generation: u64) -> Acquisition {
        let transport = Arc::clone(&self.transport);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let policy = self.policy.clone();
        let ttl = self.ttl;

        async move {
            let outcome =
                acquire_with_retry(transport.as_ref(), &credentials, &policy, &state, generation)
                    .await;

            let mut guard = lock(&state);
            let current = guard.generation == generation;
            if current {
                guard.in_flight.remove(TOKEN_DEDUP_KEY);
            }

            let token = match outcome {
                Ok(grant) => AccessToken {
                    value: grant.access_token,
                    instance_url: grant.instance_url,
                    issued_at: clock.now(),
                    ttl,
                },
                Err(e) => return Err(e),
            };

            if current {
                guard.cached = Some(token.clone());
            } else {
                debug!("Broker was reset during acquisition, token not cached");
            }
            Ok(token)
        }
        .boxed()
        .shared()
    }
}

/// Runs one acquisition to completion under `policy`. `generation` is the
/// broker generation the acquisition was started for.
async fn acquire_with_retry(
    transport: &dyn TokenTransport,
    credentials: &CrmCredentials,
    policy: &RetryPolicy,
    state: &Mutex<BrokerState>,
    generation: u64,
) -> Result<TokenGrant, BrokerError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let failure = match transport.request_token(credentials).await {
            Ok(grant) => {
                info!(attempt = attempt, "CRM access token acquired");
                return Ok(grant);
            }
            Err(failure) => failure,
        };

        match failure.kind {
            FailureKind::Auth if attempt == 1 && attempt < max_attempts => {
                warn!(
                    attempt = attempt,
                    error = %failure,
                    "Token request rejected, clearing cached token and retrying"
                );
                let mut guard = lock(state);
                if guard.generation == generation {
                    guard.cached = None;
                }
            }
            FailureKind::Auth => {
                return Err(BrokerError::Auth {
                    attempts: attempt,
                    last_cause: failure.message,
                });
            }
            FailureKind::Network if attempt < max_attempts => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Token request failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
            FailureKind::Network => {
                return Err(BrokerError::Network {
                    attempts: attempt,
                    last_cause: failure.message,
                });
            }
            FailureKind::Other => {
                return Err(BrokerError::Other(format!(
                    "token request failed after {} attempt(s): {}",
                    attempt, failure.message
                )));
            }
        }
    }
}
