//! CRM credential secret lookup.
//!
//! Lists the secrets visible to the resolved profile, picks one by a fixed
//! priority (exact name, then substring, then fallback keywords), fetches and
//! repairs its payload, and checks it against the required field schema.
//! Only a record carrying every required field is handed out.

mod payload;

pub use payload::{parse_fields, repair};

use crate::cloud::CloudCli;
use crate::error::BrokerError;
use crate::profile::CredentialProfile;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields every CRM credential secret must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["username", "password", "client_id", "client_secret"];

/// A schema-valid secret. Held in memory only; `Debug` never shows values.
#[derive(Clone)]
pub struct SecretRecord {
    pub name: String,
    raw_payload: String,
    fields: HashMap<String, String>,
}

impl SecretRecord {
    pub(crate) fn new(name: String, raw_payload: String, fields: HashMap<String, String>) -> Self {
        Self {
            name,
            raw_payload,
            fields,
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("fields", &keys)
            .finish_non_exhaustive()
    }
}

/// Which priority tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Substring,
    Keyword,
}

/// True when `needle` occurs in `haystack` delimited by non-alphanumeric
/// characters or the string edges (`sales` in `bar-sales-creds`, not in
/// `salesforce`). Both arguments are expected lowercase.
fn contains_segment(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// First name (store order) containing `needle`, preferring whole-segment
/// occurrences over matches inside a longer word.
fn find_containing<'a>(names: &'a [String], needle: &str) -> Option<&'a str> {
    let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    lowered
        .iter()
        .position(|n| contains_segment(n, needle))
        .or_else(|| lowered.iter().position(|n| n.contains(needle)))
        .map(|i| names[i].as_str())
}

/// Picks a secret name by priority. `names` is in store order.
pub fn match_secret<'a>(
    names: &'a [String],
    configured: &str,
    keywords: &[String],
) -> Option<(&'a str, MatchTier)> {
    let wanted = configured.trim().to_lowercase();

    if !wanted.is_empty() {
        if let Some(name) = names.iter().find(|n| n.to_lowercase() == wanted) {
            return Some((name.as_str(), MatchTier::Exact));
        }
        if let Some(name) = find_containing(names, &wanted) {
            return Some((name, MatchTier::Substring));
        }
    }

    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .find_map(|keyword| find_containing(names, &keyword))
        .map(|name| (name, MatchTier::Keyword))
}

/// Validates `fields` against [`REQUIRED_FIELDS`].
///
/// `missing` keeps schema order; `present` lists the required keys found
/// (schema order) followed by any extra keys, sorted.
pub fn check_schema(secret: &str, fields: &HashMap<String, String>) -> Result<(), BrokerError> {
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| !fields.contains_key(**f))
        .map(|f| f.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let mut present: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| fields.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    let mut extra: Vec<String> = fields
        .keys()
        .filter(|k| !REQUIRED_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    extra.sort();
    present.extend(extra);

    Err(BrokerError::SecretSchema {
        secret: secret.to_string(),
        missing,
        present,
    })
}

pub struct SecretLocator {
    cli: Arc<dyn CloudCli>,
}

impl SecretLocator {
    pub fn new(cli: Arc<dyn CloudCli>) -> Self {
        Self { cli }
    }

    /// Finds, fetches and validates the CRM credential secret.
    pub async fn locate(
        &self,
        profile: &CredentialProfile,
        configured_name: &str,
        fallback_keywords: &[String],
    ) -> Result<SecretRecord, BrokerError> {
        let names = self
            .cli
            .list_secret_names(&profile.name, &profile.region)
            .await
            .map_err(|e| BrokerError::Other(format!("failed to list secrets: {}", e)))?;

        debug!(
            profile = %profile.name,
            region = %profile.region,
            visible = names.len(),
            "Listed secrets"
        );

        let (name, tier) = match match_secret(&names, configured_name, fallback_keywords) {
            Some(found) => found,
            None => {
                warn!(
                    configured = %configured_name,
                    keywords = ?fallback_keywords,
                    "No secret matched"
                );
                return Err(BrokerError::SecretNotFound {
                    tried_name: configured_name.to_string(),
                    keywords: fallback_keywords.to_vec(),
                    available: names.clone(),
                });
            }
        };

        if tier != MatchTier::Exact {
            info!(
                secret = %name,
                tier = ?tier,
                configured = %configured_name,
                "Using closest secret match"
            );
        }

        let raw_payload = self
            .cli
            .secret_string(&profile.name, &profile.region, name)
            .await
            .map_err(|e| BrokerError::Other(format!("failed to read secret '{}': {}", name, e)))?;

        let fields = parse_fields(&raw_payload)
            .map_err(|e| BrokerError::Other(format!("secret '{}': {}", name, e)))?;

        check_schema(name, &fields)?;

        info!(secret = %name, "CRM credential secret loaded");

        Ok(SecretRecord::new(name.to_string(), raw_payload, fields))
    }
}
