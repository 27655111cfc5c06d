use anyhow::{anyhow, Context, Result};
use credbroker::config::CrmConfig;
use credbroker::token::{describe_error_body, TokenBroker};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_VERSION: &str = "v59.0";

/// Upper bound on pages fetched by [`QueryClient::query_all`].
const MAX_PAGES: usize = 500;

/// One page of query results.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse<T = Value> {
    pub total_size: u64,
    pub done: bool,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    /// Relative path of the next page, present while `done` is false.
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// HTTP client for the CRM query endpoint.
///
/// Every request asks the broker for a token, so a cached token is reused and
/// an expired one is refreshed transparently. A 401 answer drops the cached
/// token before the error is returned.
pub struct QueryClient {
    broker: Arc<TokenBroker>,
    http_client: Client,
    api_version: String,
}

impl QueryClient {
    pub fn new(broker: Arc<TokenBroker>, api_version: impl Into<String>) -> Result<Self> {
        Self::with_timeout(broker, api_version, Duration::from_secs(30))
    }

    /// Builds a client from the `[crm]` config section.
    pub fn from_config(broker: Arc<TokenBroker>, config: &CrmConfig) -> Result<Self> {
        Self::with_timeout(broker, config.api_version.as_str(), config.request_timeout())
    }

    pub fn with_timeout(
        broker: Arc<TokenBroker>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("credbroker-crm-query/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            broker,
            http_client,
            api_version: api_version.into(),
        })
    }

    /// Run a SOQL query and return the first page.
    pub async fn query<T: DeserializeOwned>(&self, soql: &str) -> Result<QueryResponse<T>> {
        let path = format!("/services/data/{}/query", self.api_version);
        self.fetch_page(&path, Some(soql)).await
    }

    /// Fetch a follow-up page by its `nextRecordsUrl`.
    pub async fn query_more<T: DeserializeOwned>(
        &self,
        next_records_url: &str,
    ) -> Result<QueryResponse<T>> {
        self.fetch_page(next_records_url, None).await
    }

    /// Run a SOQL query and collect every page.
    pub async fn query_all<T: DeserializeOwned>(&self, soql: &str) -> Result<Vec<T>> {
        let mut page: QueryResponse<T> = self.query(soql).await?;
        let mut records = std::mem::take(&mut page.records);

        for _ in 0..MAX_PAGES {
            let next = match (page.done, page.next_records_url.take()) {
                (false, Some(next)) => next,
                _ => return Ok(records),
            };
            debug!(next = %next, fetched = records.len(), "Fetching next query page");
            page = self.query_more(&next).await?;
            records.append(&mut page.records);
        }

        Err(anyhow!("Query returned more than {} pages", MAX_PAGES))
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        soql: Option<&str>,
    ) -> Result<QueryResponse<T>> {
        let token = self.broker.get_token().await?;
        if token.instance_url.is_empty() {
            return Err(anyhow!("Access token carries no instance URL"));
        }
        let url = format!("{}{}", token.instance_url.trim_end_matches('/'), path);

        let mut request = self.http_client.get(&url).bearer_auth(&token.value);
        if let Some(soql) = soql {
            request = request.query(&[("q", soql)]);
        }

        let response = request
            .send()
            .await
            .context("Failed to send query request")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!("CRM rejected the access token, invalidating it");
            self.broker.invalidate();
            return Err(anyhow!(
                "CRM auth error (401): {}",
                describe_error_body(&body)
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "CRM API error: HTTP {}: {}",
                status.as_u16(),
                describe_error_body(&body)
            ));
        }

        response
            .json::<QueryResponse<T>>()
            .await
            .context("Failed to parse query response")
    }
}
