//! Error taxonomy for the scrape engine.
//!
//! Every stage maps its own failure type into [`ScrapeError`] so the
//! pipeline's retry loop can decide what to do with it in one place.

use serde::Serialize;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::fetch::FetchError;
use crate::store::StoreError;

/// Failure of a single scrape attempt (or of the whole run, once retries are spent).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ScrapeError {
    /// DNS, timeout or connection reset during a plain HTTP stage.
    #[error("network error: {0}")]
    Network(String),

    /// Navigation timeout, context creation failure or browser crash.
    #[error("browser error: {0}")]
    Browser(String),

    /// The search stage could not resolve an episode page.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// No selector or pattern produced a stream URL.
    #[error("stream not found: {0}")]
    NotFound(String),

    /// Admission was denied because the circuit breaker is open.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ScrapeError {
    /// Whether the pipeline's outer loop should try again after this error.
    ///
    /// Admission denials are retry-later for the caller, not for the loop:
    /// hammering an open breaker only burns attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Network(_)
                | ScrapeError::Browser(_)
                | ScrapeError::SearchFailed(_)
                | ScrapeError::NotFound(_)
        )
    }
}

impl From<FetchError> for ScrapeError {
    fn from(e: FetchError) -> Self {
        ScrapeError::Network(e.to_string())
    }
}

impl From<BrowserError> for ScrapeError {
    fn from(e: BrowserError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

impl From<StoreError> for ScrapeError {
    fn from(e: StoreError) -> Self {
        ScrapeError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_follows_taxonomy() {
        assert!(ScrapeError::Network("reset".into()).is_retryable());
        assert!(ScrapeError::Browser("crash".into()).is_retryable());
        assert!(ScrapeError::SearchFailed("no match".into()).is_retryable());
        assert!(ScrapeError::NotFound("no iframe".into()).is_retryable());
        assert!(!ScrapeError::Unavailable("breaker open".into()).is_retryable());
        assert!(!ScrapeError::InvalidInput("episode 0".into()).is_retryable());
        assert!(!ScrapeError::Persistence("disk full".into()).is_retryable());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(ScrapeError::Unavailable("open".into())).unwrap();
        assert_eq!(json["kind"], "unavailable");
        assert_eq!(json["message"], "open");
    }

    #[test]
    fn fetch_errors_map_to_network() {
        let e: ScrapeError = FetchError::Timeout("https://example.com".into()).into();
        assert!(matches!(e, ScrapeError::Network(_)));
    }
}
