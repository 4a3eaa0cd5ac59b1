//! Per-episode scrape pipeline: Search, Dynamic Extraction, Protection Check.
//!
//! Only the dynamic stage goes through the admission controller. The outer
//! loop retries whole attempts with a fixed delay and surfaces the last error
//! once attempts run out.

mod dynamic;
mod protection;
mod search;
mod types;

pub use dynamic::{extract_from_html, extract_hop, DynamicStage};
pub use protection::{body_signals, header_signals, ProtectionChecker, EMBEDDABLE_HOSTS};
pub use search::{normalize_title, rank_candidates, slugify, AnimePage, SearchStage};
pub use types::{
    AllEpisodesOptions, EpisodeScrapeResult, ExtractionResult, ProtectionResult, ScrapeOptions,
    SearchMethod, SearchResult, SeriesScrapeResult,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionStats};
use crate::browser::{BrowserSessionManager, PageRenderer};
use crate::config::Settings;
use crate::error::ScrapeError;
use crate::extractor::{build_strategy, ExtractorStrategy};
use crate::fetch::{HttpClient, PageFetcher};

/// Anything that can scrape a single episode. The bulk orchestrator depends on this, not on the pipeline.
#[async_trait]
pub trait EpisodeScraper: Send + Sync {
    async fn scrape_episode(
        &self,
        title: &str,
        episode: u32,
        options: ScrapeOptions,
    ) -> EpisodeScrapeResult;
}

pub struct ExtractionPipeline {
    search: SearchStage,
    dynamic: DynamicStage,
    protection: ProtectionChecker,
    strategy: Arc<dyn ExtractorStrategy>,
    /// Cap for the plain HTTP fetches of the search and protection stages.
    http_timeout: Duration,
    /// Set when the pipeline owns its browser, so it can shut it down.
    browser: Option<Arc<BrowserSessionManager>>,
}

impl ExtractionPipeline {
    pub fn new(
        settings: &Settings,
        fetcher: Arc<dyn PageFetcher>,
        renderer: Arc<dyn PageRenderer>,
        strategy: Arc<dyn ExtractorStrategy>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        let search = SearchStage::new(
            fetcher.clone(),
            strategy.clone(),
            settings.cache_capacity,
            settings.search_cache_ttl(),
        );
        let dynamic = DynamicStage::new(
            fetcher.clone(),
            renderer,
            strategy.clone(),
            admission,
            settings.cache_capacity,
            settings.stream_cache_ttl(),
        );
        let protection = ProtectionChecker::new(fetcher, strategy.exempt_hosts());

        Self {
            search,
            dynamic,
            protection,
            strategy,
            http_timeout: settings.request_timeout(),
            browser: None,
        }
    }

    /// Wire the real HTTP client, browser and site strategy from settings.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let fetcher = HttpClient::new(settings.request_timeout(), settings.user_agent.as_deref())
            .context("Failed to build HTTP client")?;
        let browser = Arc::new(
            BrowserSessionManager::new(settings.browser.clone())
                .with_user_agent(settings.user_agent.as_deref()),
        );
        let strategy = build_strategy(&settings.site).context("Invalid site configuration")?;
        let admission = AdmissionController::new(settings.max_concurrency, settings.breaker());

        let mut pipeline = Self::new(
            settings,
            Arc::new(fetcher),
            browser.clone(),
            strategy,
            Arc::new(admission),
        );
        pipeline.browser = Some(browser);
        Ok(pipeline)
    }

    /// Close the owned browser, if any. Queued extractions are rejected.
    pub async fn shutdown(&self) {
        self.dynamic.admission().close();
        if let Some(browser) = &self.browser {
            browser.close().await;
        }
    }

    pub fn strategy(&self) -> &dyn ExtractorStrategy {
        self.strategy.as_ref()
    }

    pub fn admission_stats(&self) -> AdmissionStats {
        self.dynamic.admission().stats()
    }

    /// Scrape one episode, retrying transient failures.
    pub async fn scrape_episode(
        &self,
        title: &str,
        episode: u32,
        options: ScrapeOptions,
    ) -> EpisodeScrapeResult {
        if title.trim().is_empty() {
            return EpisodeScrapeResult::failure(
                title,
                episode,
                0,
                ScrapeError::InvalidInput("title is empty".to_string()),
            );
        }
        if episode == 0 {
            return EpisodeScrapeResult::failure(
                title,
                episode,
                0,
                ScrapeError::InvalidInput("episode numbers start at 1".to_string()),
            );
        }

        let max_attempts = options.retries.max(1);
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;
            match self.attempt(title, episode, options.timeout).await {
                Ok(mut result) => {
                    result.attempts = attempts;
                    info!(
                        "Scraped {:?} episode {} in {} attempt(s)",
                        title, episode, attempts
                    );
                    return result;
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {:?} episode {} failed: {}",
                        attempts, max_attempts, title, episode, e
                    );
                    let retry = e.is_retryable() && attempts < max_attempts;
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                    // A cached search hit may be what led us astray
                    self.search.forget(title, episode);
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| ScrapeError::NotFound(format!("{:?} episode {}", title, episode)));
        EpisodeScrapeResult::failure(title, episode, attempts, error)
    }

    async fn attempt(
        &self,
        title: &str,
        episode: u32,
        timeout: Duration,
    ) -> Result<EpisodeScrapeResult, ScrapeError> {
        let http_timeout = timeout.min(self.http_timeout);
        let found = self.search.search(title, episode, http_timeout).await?;
        debug!(
            "Search ({:?}) resolved {:?} episode {} to {}",
            found.method, title, episode, found.anime_link
        );

        let extracted = self.dynamic.extract(&found, episode, timeout).await?;
        let protection = self
            .protection
            .check(&extracted.stream_url, &found.anime_link, http_timeout)
            .await;

        Ok(EpisodeScrapeResult {
            success: true,
            title: title.to_string(),
            episode_number: episode,
            anime_id: Some(found.anime_id),
            episode_url: Some(found.anime_link),
            stream_url: Some(extracted.stream_url),
            protection: Some(protection),
            attempts: 0,
            error: None,
        })
    }

    /// Scrape every listed episode of a series, up to `max_episodes`.
    ///
    /// Episodes come from the anime page when it can be found; otherwise
    /// `1..=max_episodes` is tried blind. Results keep episode order.
    pub async fn scrape_all_episodes(
        &self,
        title: &str,
        options: AllEpisodesOptions,
    ) -> SeriesScrapeResult {
        let max = options.max_episodes;
        let (anime_id, numbers) = match self
            .search
            .anime_page(title, options.scrape.timeout.min(self.http_timeout))
            .await
        {
            Ok(page) => {
                let mut numbers = Vec::new();
                for link in page.episodes.iter().take(max as usize) {
                    self.search.remember(
                        title,
                        link.number,
                        SearchResult {
                            anime_link: link.url.clone(),
                            anime_id: page.anime_id.clone(),
                            anime_page: Some(page.url.clone()),
                            method: SearchMethod::Keyword,
                        },
                    );
                    numbers.push(link.number);
                }
                if numbers.is_empty() {
                    debug!("Anime page {} lists no episodes, trying 1..={}", page.url, max);
                    numbers = (1..=max).collect();
                }
                (Some(page.anime_id), numbers)
            }
            Err(e) => {
                warn!("Could not list episodes of {:?}: {}", title, e);
                (None, (1..=max).collect())
            }
        };

        info!("Scraping {} episode(s) of {:?}", numbers.len(), title);
        let episodes: Vec<EpisodeScrapeResult> = stream::iter(numbers)
            .map(|n| self.scrape_episode(title, n, options.scrape))
            .buffered(options.parallelism.max(1))
            .collect()
            .await;

        let scraped = episodes.iter().filter(|e| e.success).count() as u32;
        SeriesScrapeResult {
            title: title.to_string(),
            anime_id,
            failed_episodes: episodes.len() as u32 - scraped,
            scraped_episodes: scraped,
            episodes,
        }
    }
}

#[async_trait]
impl EpisodeScraper for ExtractionPipeline {
    async fn scrape_episode(
        &self,
        title: &str,
        episode: u32,
        options: ScrapeOptions,
    ) -> EpisodeScrapeResult {
        ExtractionPipeline::scrape_episode(self, title, episode, options).await
    }
}
