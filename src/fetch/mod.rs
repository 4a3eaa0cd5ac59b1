//! Plain HTTP page fetching for the search and protection stages.
//!
//! The pipeline only sees the [`PageFetcher`] trait, so tests can script
//! responses without a network and callers can wrap the client with proxies.

mod user_agent;

pub use user_agent::{random_user_agent, resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Errors from plain HTTP fetches.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        let target = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| e.to_string());
        if e.is_timeout() {
            FetchError::Timeout(target)
        } else if e.is_connect() {
            FetchError::Connect(format!("{}: {}", target, e))
        } else if e.is_builder() {
            FetchError::InvalidUrl(e.to_string())
        } else {
            FetchError::Http(e.to_string())
        }
    }
}

/// A fetched page with its body already read.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchedPage {
    /// Build a 200 response with an HTML body.
    pub fn html(url: &str, body: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
            body: body.into(),
        }
    }

    /// Check if the response is successful (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Out-of-band page fetcher (no JavaScript).
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a page and read its body as text.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// GET a page with an explicit Referer, for hosts that check it.
    async fn fetch_with_referer(&self, url: &str, referer: &str) -> Result<FetchedPage, FetchError> {
        let _ = referer;
        self.fetch(url).await
    }
}

/// Fetch through any [`PageFetcher`] with a hard deadline.
pub async fn fetch_within(
    fetcher: &dyn PageFetcher,
    url: &str,
    timeout: Duration,
) -> Result<FetchedPage, FetchError> {
    tokio::time::timeout(timeout, fetcher.fetch(url))
        .await
        .map_err(|_| FetchError::Timeout(url.to_string()))?
}

/// reqwest-backed fetcher with browser-like headers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client.
    /// `user_agent_config` follows [`resolve_user_agent`].
    pub fn new(timeout: Duration, user_agent_config: Option<&str>) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent_config);

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(&user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str, referer: Option<&str>) -> Result<FetchedPage, FetchError> {
        if url::Url::parse(url).is_err() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.get(url, None).await
    }

    async fn fetch_with_referer(&self, url: &str, referer: &str) -> Result<FetchedPage, FetchError> {
        self.get(url, Some(referer)).await
    }
}
