//! Stage payloads and per-call options.

use std::time::Duration;

use serde::Serialize;

use crate::error::ScrapeError;

/// How the search stage found the episode page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// Slug-derived URL answered.
    Direct,
    /// Keyword search plus anime page lookup.
    Keyword,
}

/// Output of the search stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Episode page to render.
    pub anime_link: String,
    pub anime_id: String,
    /// Anime overview page, when search went through one.
    pub anime_page: Option<String>,
    pub method: SearchMethod,
}

/// Output of the dynamic extraction stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub stream_url: String,
    /// Where the URL was found (selector, "frame", "pattern", "hop").
    pub source: String,
    /// Indirection pages followed to get here.
    pub hops: u32,
}

/// Output of the protection check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionResult {
    pub protected: bool,
    pub reasons: Vec<String>,
    /// Host is a known embeddable provider; signatures were not consulted.
    pub exempt: bool,
}

/// Options for one episode scrape.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    /// Per-stage timeout. Browser navigation uses it as is; search and
    /// protection fetches are further capped by `request_timeout_secs`.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Options for a whole-series scrape.
#[derive(Debug, Clone, Copy)]
pub struct AllEpisodesOptions {
    pub max_episodes: u32,
    pub scrape: ScrapeOptions,
    /// Episodes in flight at once.
    pub parallelism: usize,
}

impl Default for AllEpisodesOptions {
    fn default() -> Self {
        Self {
            max_episodes: 24,
            scrape: ScrapeOptions::default(),
            parallelism: 2,
        }
    }
}

/// Final, caller-facing result of one episode scrape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeScrapeResult {
    pub success: bool,
    pub title: String,
    pub episode_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    /// `None` when the check never ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection: Option<ProtectionResult>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScrapeError>,
}

impl EpisodeScrapeResult {
    pub fn failure(title: &str, episode_number: u32, attempts: u32, error: ScrapeError) -> Self {
        Self {
            success: false,
            title: title.to_string(),
            episode_number,
            anime_id: None,
            episode_url: None,
            stream_url: None,
            protection: None,
            attempts,
            error: Some(error),
        }
    }

    pub fn protection_detected(&self) -> bool {
        self.protection.as_ref().is_some_and(|p| p.protected)
    }
}

/// Whole-series summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesScrapeResult {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anime_id: Option<String>,
    pub episodes: Vec<EpisodeScrapeResult>,
    pub scraped_episodes: u32,
    pub failed_episodes: u32,
}
