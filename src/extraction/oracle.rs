use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::parse::parse_oracle_response;
use super::records::RecordCategory;
use crate::config::OracleConfig;
use crate::error::{CrawlError, OracleError};

/// External service turning page text into loosely typed records
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn extract(&self, category: RecordCategory, text: &str) -> Result<Vec<Value>, OracleError>;
}

/// Stand-in used when no oracle endpoint is configured; finds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

#[async_trait]
impl ExtractionOracle for NoOracle {
    async fn extract(&self, _category: RecordCategory, _text: &str) -> Result<Vec<Value>, OracleError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct OracleRequest<'a> {
    category: &'a str,
    text: &'a str,
}

/// Oracle reached over HTTP.
///
/// POSTs `{"category", "text"}` as JSON. The answer may be a record array, an
/// object with a `records` array, an object with a `text` field holding the
/// model's raw answer, or any free-form text containing the array.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::internal(format!("failed to build oracle client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &OracleConfig) -> Result<Option<Self>, CrawlError> {
        match &config.endpoint {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint.clone(),
                config.api_key.clone(),
                Duration::from_secs(config.request_timeout_seconds),
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ExtractionOracle for HttpOracle {
    async fn extract(&self, category: RecordCategory, text: &str) -> Result<Vec<Value>, OracleError> {
        let mut request = self.client.post(&self.endpoint).json(&OracleRequest {
            category: category.as_str(),
            text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| OracleError::Transport {
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            return Err(OracleError::Api {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| OracleError::Transport {
            message: e.to_string(),
        })?;

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(mut envelope)) => match envelope.remove("records") {
                Some(Value::Array(records)) => Ok(records),
                _ => match envelope.remove("text") {
                    Some(Value::String(answer)) => parse_oracle_response(&answer),
                    _ => parse_oracle_response(&body),
                },
            },
            _ => parse_oracle_response(&body),
        }
    }
}

/// Call counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct OracleStats {
    pub calls: u64,
    pub failures: u64,
    pub exhausted: u64,
}

/// Wraps an oracle with bounded retries and a minimum spacing between calls.
/// Never fails: exhaustion yields an empty list.
pub struct RetryingOracle {
    inner: Arc<dyn ExtractionOracle>,
    max_retries: u32,
    retry_delay: Duration,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    stats: Mutex<OracleStats>,
}

impl RetryingOracle {
    pub fn new(inner: Arc<dyn ExtractionOracle>, config: &OracleConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_call: Mutex::new(None),
            stats: Mutex::new(OracleStats::default()),
        }
    }

    /// Wire up the configured HTTP oracle, or `NoOracle` when none is set
    pub fn from_config(config: &OracleConfig) -> Result<Self, CrawlError> {
        let inner: Arc<dyn ExtractionOracle> = match HttpOracle::from_config(config)? {
            Some(oracle) => {
                info!("Extraction oracle at {}", config.endpoint.as_deref().unwrap_or_default());
                Arc::new(oracle)
            }
            None => {
                warn!("No extraction oracle configured, pages will yield no records");
                Arc::new(NoOracle)
            }
        };
        Ok(Self::new(inner, config))
    }

    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let since = previous.elapsed();
            if since < self.min_interval {
                tokio::time::sleep(self.min_interval - since).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    pub async fn extract(&self, category: RecordCategory, text: &str) -> Vec<Value> {
        for attempt in 0..self.max_retries {
            self.throttle().await;
            self.stats.lock().await.calls += 1;

            match self.inner.extract(category, text).await {
                Ok(records) => {
                    debug!("Oracle returned {} {} records", records.len(), category);
                    return records;
                }
                Err(e) => {
                    self.stats.lock().await.failures += 1;
                    warn!(
                        "Oracle call for {} failed (attempt {}/{}): {}",
                        category,
                        attempt + 1,
                        self.max_retries,
                        e
                    );

                    if !e.is_retryable() || attempt + 1 == self.max_retries {
                        break;
                    }
                    tokio::time::sleep(e.retry_delay(self.retry_delay, attempt)).await;
                }
            }
        }

        self.stats.lock().await.exhausted += 1;
        error!("Giving up on {} extraction", category);
        Vec::new()
    }

    pub async fn stats(&self) -> OracleStats {
        self.stats.lock().await.clone()
    }
}
