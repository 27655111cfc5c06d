//! OAuth2 password-grant exchange against the CRM login host.

use super::classify::TokenFailure;
use super::CrmCredentials;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::error::Error as _;
use std::time::Duration;
use tracing::debug;

/// Path of the token endpoint below the login URL.
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Successful password-grant response.
#[derive(Deserialize, Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub instance_url: String,
    #[serde(default)]
    pub issued_at: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Performs one upstream token request. Implementations classify their own
/// failures (see [`TokenFailure::from_message`]).
#[async_trait]
pub trait TokenTransport: Send + Sync {
    async fn request_token(&self, credentials: &CrmCredentials)
        -> Result<TokenGrant, TokenFailure>;
}

/// Form fields for the password grant. The security token, when present, is
/// appended to the password as the backend expects.
pub fn grant_form(credentials: &CrmCredentials) -> Vec<(&'static str, String)> {
    let password = match &credentials.security_token {
        Some(token) => format!("{}{}", credentials.password, token),
        None => credentials.password.clone(),
    };
    vec![
        ("grant_type", "password".to_string()),
        ("client_id", credentials.client_id.clone()),
        ("client_secret", credentials.client_secret.clone()),
        ("username", credentials.username.clone()),
        ("password", password),
    ]
}

/// Turns a backend error body into a readable message.
///
/// Handles both OAuth-style `{error, error_description}` objects and REST-style
/// `[{errorCode, message}]` arrays. Falls back to a truncated raw body.
pub fn describe_error_body(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let entry = match parsed {
        Some(Value::Array(items)) => items.into_iter().next(),
        Some(other @ Value::Object(_)) => Some(other),
        _ => None,
    };

    let field = |value: &Value, keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    if let Some(entry) = entry {
        let code = field(&entry, &["error", "errorCode"]);
        let description = field(&entry, &["error_description", "message"]);
        match (code, description) {
            (Some(code), Some(description)) => return format!("{}: {}", code, description),
            (Some(code), None) => return code,
            (None, Some(description)) => return description,
            (None, None) => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Describes a transport error without the request URL, so host names and
/// ports never reach the classifier.
fn describe_transport_error(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "request timeout"
    } else if error.is_connect() {
        "fetch failed: could not connect to login host"
    } else if error.is_request() {
        "fetch failed: error sending request"
    } else if error.is_body() || error.is_decode() {
        "failed to read token response"
    } else {
        "fetch failed"
    };

    match error.source() {
        Some(source) => format!("{} ({})", kind, source),
        None => kind.to_string(),
    }
}

/// reqwest-backed transport.
pub struct HttpTokenTransport {
    client: reqwest::Client,
}

impl HttpTokenTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenTransport for HttpTokenTransport {
    async fn request_token(
        &self,
        credentials: &CrmCredentials,
    ) -> Result<TokenGrant, TokenFailure> {
        let token_url = format!("{}{}", credentials.login_url.trim_end_matches('/'), TOKEN_PATH);

        debug!(token_url = %token_url, "Requesting CRM access token");

        let response = self
            .client
            .post(&token_url)
            .header("Accept", "application/json")
            .form(&grant_form(credentials))
            .send()
            .await
            .map_err(|e| TokenFailure::from_message(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenFailure::from_message(describe_transport_error(&e)))?;

        if !status.is_success() {
            return Err(TokenFailure::from_message(format!(
                "HTTP {}: {}",
                status.as_u16(),
                describe_error_body(&body)
            )));
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|e| TokenFailure::from_message(format!("malformed token response: {}", e)))?;

        if grant.access_token.is_empty() {
            return Err(TokenFailure::from_message(
                "malformed token response: empty access_token",
            ));
        }

        Ok(grant)
    }
}
