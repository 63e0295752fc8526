//! Remote API client
//!
//! Paginated, authenticated access to the warehouse REST API. The client is
//! intentionally stateless: callers own offsets and checkpointing, so a
//! crashed run can resume by simply asking for the same page again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::entities::EntityConfig;
use crate::error::FetchError;
use crate::transform::{self, DestinationRow, TransformError};

/// One fetched page of raw records
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub records: Vec<Value>,
    /// Last-page heuristic: true iff the page came back full. The API
    /// exposes no total-count header.
    pub has_more: bool,
}

/// The per-entity interface the runner drives.
///
/// One implementation exists, parameterized by `EntityConfig`; the trait
/// seam is what lets tests drive the runner without a live API.
#[async_trait]
pub trait EntitySyncSource: Send + Sync {
    /// Static configuration for the entity this source serves
    fn entity(&self) -> &EntityConfig;

    /// Fetch one page at `offset`, optionally bounded below by `updated_since`
    async fn fetch_page(
        &self,
        offset: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage, FetchError>;

    /// Transform one raw record into a destination row
    fn transform(&self, raw: &Value) -> Result<DestinationRow, TransformError> {
        transform::transform_record(self.entity(), raw)
    }
}

/// HTTP client for the remote warehouse API
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_password: String,
    page_size: usize,
    rate_limit_sleep: Duration,
    rate_limit_max_retries: u32,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_password: config.api_password.clone(),
            page_size: config.page_size,
            rate_limit_sleep: Duration::from_secs(config.rate_limit_sleep_secs),
            rate_limit_max_retries: config.rate_limit_max_retries,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch one page for an entity.
    ///
    /// Sleeps and retries on HTTP 429 up to the configured budget; the sleep
    /// suspends only this task, so sibling entity syncs keep running. Any
    /// other failure propagates immediately.
    pub async fn fetch_page(
        &self,
        entity: &EntityConfig,
        offset: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage, FetchError> {
        let url = format!("{}/{}", self.base_url, entity.api_path);

        let mut attempts: u32 = 0;
        loop {
            let mut request = self
                .client
                .get(&url)
                .basic_auth(&self.api_key, Some(&self.api_password))
                .query(&[("offset", offset.to_string()), ("limit", self.page_size.to_string())]);

            if let Some(since) = updated_since {
                request = request.query(&[("updated_since", since.to_rfc3339())]);
            }

            let response = request.send().await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                attempts += 1;
                if attempts >= self.rate_limit_max_retries {
                    return Err(FetchError::RateLimitExhausted {
                        attempts,
                        url,
                    });
                }
                warn!(
                    entity = entity.name,
                    offset,
                    attempt = attempts,
                    sleep_secs = self.rate_limit_sleep.as_secs(),
                    "Rate limited by source API, sleeping before retry"
                );
                tokio::time::sleep(self.rate_limit_sleep).await;
                continue;
            }

            if !response.status().is_success() {
                return Err(FetchError::Status {
                    status: response.status(),
                    url,
                });
            }

            let payload: Value = response.json().await?;
            let records = extract_records(&url, payload)?;
            let has_more = records.len() == self.page_size;

            debug!(
                entity = entity.name,
                offset,
                count = records.len(),
                has_more,
                "Fetched page"
            );

            return Ok(FetchedPage { records, has_more });
        }
    }
}

/// The REST API returns either a bare array or an envelope with a `data`
/// array; accept both.
fn extract_records(url: &str, payload: Value) -> Result<Vec<Value>, FetchError> {
    match payload {
        Value::Array(records) => Ok(records),
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(FetchError::Payload {
                url: url.to_string(),
                reason: "expected an array of records".to_string(),
            }),
        },
        _ => Err(FetchError::Payload {
            url: url.to_string(),
            reason: "expected an array of records".to_string(),
        }),
    }
}

/// The single `EntitySyncSource` implementation, bound to one entity type
pub struct RestEntitySource {
    client: std::sync::Arc<ApiClient>,
    entity: &'static EntityConfig,
}

impl RestEntitySource {
    pub fn new(client: std::sync::Arc<ApiClient>, entity: &'static EntityConfig) -> Self {
        Self { client, entity }
    }
}

#[async_trait]
impl EntitySyncSource for RestEntitySource {
    fn entity(&self) -> &EntityConfig {
        self.entity
    }

    async fn fetch_page(
        &self,
        offset: i64,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage, FetchError> {
        self.client.fetch_page(self.entity, offset, updated_since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_records_bare_array() {
        let records = extract_records("u", json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_extract_records_enveloped() {
        let records = extract_records("u", json!({"data": [{"id": 1}]})).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_extract_records_rejects_scalar() {
        assert!(extract_records("u", json!(42)).is_err());
        assert!(extract_records("u", json!({"data": "nope"})).is_err());
    }
}
