mod env;

use crate::token::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete broker configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub secret: SecretConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Cloud CLI and profile settings
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Preferred profile; empty means "try the fallbacks"
    #[serde(default)]
    pub profile: String,
    /// Region override; empty defers to the profile's own region
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    #[serde(default = "default_fallback_profiles")]
    pub fallback_profiles: Vec<String>,
    /// Timeout for the tool-presence check (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_cli_path() -> String {
    "aws".to_string()
}

fn default_fallback_profiles() -> Vec<String> {
    crate::profile::FALLBACK_PROFILES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_probe_timeout() -> u64 {
    10
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            region: String::new(),
            cli_path: default_cli_path(),
            fallback_profiles: default_fallback_profiles(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Which secret holds the CRM credentials
#[derive(Debug, Clone, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

fn default_keywords() -> Vec<String> {
    vec!["salesforce".to_string()]
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            keywords: default_keywords(),
        }
    }
}

/// CRM backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Assumed access token lifetime (seconds)
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
    /// HTTP client timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_login_url() -> String {
    "https://login.salesforce.com".to_string()
}

fn default_api_version() -> String {
    "v59.0".to_string()
}

fn default_token_ttl() -> i64 {
    crate::token::DEFAULT_TOKEN_TTL_SECS
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            api_version: default_api_version(),
            token_ttl_secs: default_token_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CrmConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Token acquisition retry budget
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_jitter_ratio() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: if self.jitter_ratio.is_finite() {
                self.jitter_ratio.clamp(0.0, 1.0)
            } else {
                default_jitter_ratio()
            },
        }
    }
}

/// Status persistence
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

fn default_db_path() -> String {
    "credbroker.db".to_string()
}

fn default_workspace() -> String {
    "default".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            workspace: default_workspace(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BrokerConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: BrokerConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
