//! Outbound HTTP plumbing for the sync engine: a rate-limited paginated
//! fetcher over graph-style JSON APIs, retry/backoff classification, and
//! the bounded-concurrency enrichment pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub mod ads;
pub mod pool;
pub mod social;

pub use pool::{enrich_many, EnrichmentOutcome, PoolConfig};

pub const CRATE_NAME: &str = "relay-platforms";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response; the body is read before the error is raised so
    /// callers can log the platform's own diagnostic.
    #[error("platform api returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

/// One page of a cursor-paginated listing. `next` is the opaque URL the
/// platform handed back, followed verbatim, never reconstructed.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// Single-page fetch primitive. Mockable seam for pagination tests and
/// for the engine's integration suite.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<Page, ApiError>;
}

/// Backpressure pacing applied before every outbound request.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self);
}

/// Fixed minimum inter-request delay, the engine's baseline defence
/// against external rate limits.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub interval: Duration,
}

impl FixedDelay {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Pacer for FixedDelay {
    async fn pause(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn status_is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn transport_is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone)]
pub struct GraphClientConfig {
    pub base_url: String,
    pub access_token: String,
    /// Uniform timeout for every outbound call, bulk and per-item alike.
    pub timeout: Duration,
    pub rate_limit: Duration,
    pub backoff: BackoffPolicy,
}

impl GraphClientConfig {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(20),
            rate_limit: Duration::from_millis(200),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Authenticated client for a graph-style JSON API: bearer token as a
/// query parameter, `{data, paging.next}` listing envelopes.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    pacer: Arc<dyn Pacer>,
    backoff: BackoffPolicy,
}

impl GraphClient {
    pub fn new(config: GraphClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token,
            pacer: Arc::new(FixedDelay::new(config.rate_limit)),
            backoff: config.backoff,
        })
    }

    /// Build an endpoint URL with the access token appended.
    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<String, ApiError> {
        let mut url = url::Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|_| ApiError::InvalidUrl(format!("{}/{}", self.base_url, path)))?;
        for (key, value) in params {
            url.query_pairs_mut().append_pair(key, value);
        }
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token);
        Ok(url.into())
    }

    async fn get_with_retry(&self, url: &str) -> Result<(u16, String), ApiError> {
        for attempt in 0..=self.backoff.max_retries {
            self.pacer.pause().await;
            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    if (200..300).contains(&status) {
                        return Ok((status, body));
                    }
                    if status_is_retryable(status) && attempt < self.backoff.max_retries {
                        warn!(status, attempt, "retryable platform error, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(ApiError::Status { status, body });
                }
                Err(err) => {
                    if transport_is_retryable(&err) && attempt < self.backoff.max_retries {
                        warn!(error = %err, attempt, "transport error, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    /// GET a JSON document from a fully-formed URL.
    pub async fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        let (_, body) = self.get_with_retry(url).await?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl PageSource for GraphClient {
    async fn fetch_page(&self, url: &str) -> Result<Page, ApiError> {
        let (_, body) = self.get_with_retry(url).await?;
        let envelope: PageEnvelope =
            serde_json::from_str(&body).map_err(|source| ApiError::Decode {
                url: url.to_string(),
                source,
            })?;
        Ok(Page {
            items: envelope.data,
            next: envelope.paging.and_then(|p| p.next),
        })
    }
}

/// Follow `paging.next` cursors until exhausted, concatenating items.
pub async fn fetch_all(source: &dyn PageSource, first_url: &str) -> Result<Vec<Value>, ApiError> {
    let mut items = Vec::new();
    let mut next = Some(first_url.to_string());
    while let Some(url) = next {
        let page = source.fetch_page(&url).await?;
        items.extend(page.items);
        next = page.next;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPacer {
        pauses: AtomicUsize,
    }

    #[async_trait]
    impl Pacer for CountingPacer {
        async fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Mirrors the real client's discipline: one pause before every page
    /// request, cursor followed verbatim.
    struct ScriptedApi {
        pacer: Arc<CountingPacer>,
        pages: Vec<Page>,
    }

    #[async_trait]
    impl PageSource for ScriptedApi {
        async fn fetch_page(&self, url: &str) -> Result<Page, ApiError> {
            self.pacer.pause().await;
            let index: usize = url
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .expect("scripted url carries a page index");
            Ok(self.pages[index].clone())
        }
    }

    fn page(values: &[i64], next: Option<&str>) -> Page {
        Page {
            items: values.iter().map(|v| serde_json::json!(v)).collect(),
            next: next.map(String::from),
        }
    }

    #[tokio::test]
    async fn pagination_terminates_and_paces_every_page() {
        let pacer = Arc::new(CountingPacer {
            pauses: AtomicUsize::new(0),
        });
        let api = ScriptedApi {
            pacer: Arc::clone(&pacer),
            pages: vec![
                page(&[1, 2], Some("mock://pages/1")),
                page(&[3], Some("mock://pages/2")),
                page(&[4, 5], None),
            ],
        };

        let items = fetch_all(&api, "mock://pages/0").await.expect("all pages");
        let values: Vec<i64> = items.iter().map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(pacer.pauses.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(350));
    }

    #[test]
    fn only_throttle_and_server_errors_retry() {
        assert!(status_is_retryable(429));
        assert!(status_is_retryable(503));
        assert!(!status_is_retryable(400));
        assert!(!status_is_retryable(401));
    }

    #[tokio::test]
    async fn endpoint_appends_params_and_token() {
        let client = GraphClient::new(GraphClientConfig::new(
            "https://graph.example.com/v19.0",
            "tok123",
        ))
        .expect("client");
        let url = client
            .endpoint("act_1/campaigns", &[("limit", "100".to_string())])
            .expect("url");
        assert!(url.starts_with("https://graph.example.com/v19.0/act_1/campaigns?"));
        assert!(url.contains("limit=100"));
        assert!(url.contains("access_token=tok123"));
    }
}
