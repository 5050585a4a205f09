//! Remote archive retrieval.
//!
//! [`Retriever::fetch`] pulls one remote path into memory. Transport
//! failures (connection errors, timeouts, 5xx) are retried through the
//! configured backoff sequence; once it is exhausted the fetch returns
//! `Ok(None)` instead of failing, and the caller treats that as a terminal
//! miss.
//!
//! The upstream host reports throttling and missing files with ordinary HTML
//! pages, often with a 200 status. Every successful body is therefore checked
//! for the three known poison markers before it is handed back:
//!
//! | Marker | Error |
//! |--------|-------|
//! | `SEC.gov \| Request Rate Threshold Exceeded` | [`FetchError::RateLimited`] |
//! | `SEC.gov \| File Not Found Error Alert (404)` | [`FetchError::NotFound`] |
//! | `<Error><Code>AccessDenied</Code>…` | [`FetchError::AccessDenied`] |

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::HttpConfig;
use crate::error::{FetchError, TransportFailure};

const RATE_LIMIT_MARKER: &[u8] = b"SEC.gov | Request Rate Threshold Exceeded";
const NOT_FOUND_MARKER: &[u8] = b"SEC.gov | File Not Found Error Alert (404)";
const ACCESS_DENIED_MARKER: &[u8] =
    b"<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>";

/// Raw HTTP response as seen by the retriever.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
}

/// A successfully retrieved remote resource.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub last_modified: Option<NaiveDate>,
}

/// The network seam. [`HttpTransport`] is the production implementation;
/// tests substitute scripted transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportFailure>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportFailure> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportFailure(e.to_string()))?;

        let status = resp.status().as_u16();
        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportFailure(e.to_string()))?;

        Ok(RawResponse {
            status,
            last_modified,
            body: body.to_vec(),
        })
    }
}

/// Fetches remote paths relative to a base URL with bounded retry.
#[derive(Clone)]
pub struct Retriever {
    base_url: reqwest::Url,
    transport: Arc<dyn Transport>,
    backoff: Vec<Duration>,
    request_delay: Duration,
}

impl Retriever {
    /// Build a retriever over HTTP from configuration.
    pub fn from_config(config: &HttpConfig) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: &HttpConfig,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            base_url: reqwest::Url::parse(&base)?,
            transport,
            backoff: config
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// Override the backoff sequence.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolve a remote path against the base URL. A leading `/` is ignored.
    pub fn resolve(&self, path: &str) -> Result<reqwest::Url, FetchError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| FetchError::Transport {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    /// Retrieve a remote path to memory.
    ///
    /// Returns `Ok(None)` when every attempt failed at the transport level.
    pub async fn fetch(&self, path: &str) -> Result<Option<Fetched>, FetchError> {
        info!(path, "retrieving remote path");
        let url = self.resolve(path)?;

        let mut failures = 0usize;
        let response = loop {
            let outcome = match self.transport.get(url.as_str()).await {
                Ok(resp) if resp.status >= 500 => {
                    Err(TransportFailure(format!("HTTP {}", resp.status)))
                }
                other => other,
            };

            match outcome {
                Ok(resp) => break resp,
                Err(e) => {
                    let Some(delay) = self.backoff.get(failures) else {
                        error!(path, failures, error = %e, "retries exhausted");
                        return Ok(None);
                    };
                    warn!(path, failures, error = %e, "fetch failed; backing off");
                    tokio::time::sleep(*delay).await;
                    failures += 1;
                }
            }
        };

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        classify(path, &response)?;

        let last_modified = response.last_modified.as_deref().and_then(|v| {
            match chrono::DateTime::parse_from_rfc2822(v) {
                Ok(dt) => Some(dt.date_naive()),
                Err(e) => {
                    warn!(path, value = v, error = %e, "unparseable Last-Modified header");
                    None
                }
            }
        });

        info!(path, bytes = response.body.len(), "retrieved remote path");
        Ok(Some(Fetched {
            bytes: response.body,
            last_modified,
        }))
    }
}

/// Map poison payloads and hard status codes to typed failures.
fn classify(path: &str, resp: &RawResponse) -> Result<(), FetchError> {
    let body = resp.body.as_slice();
    if contains(body, RATE_LIMIT_MARKER) || resp.status == 429 {
        return Err(FetchError::RateLimited(path.to_string()));
    }
    if contains(body, NOT_FOUND_MARKER) || resp.status == 404 {
        return Err(FetchError::NotFound(path.to_string()));
    }
    if contains(body, ACCESS_DENIED_MARKER) || resp.status == 403 {
        return Err(FetchError::AccessDenied(path.to_string()));
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
