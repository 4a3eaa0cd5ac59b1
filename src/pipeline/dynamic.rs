//! Dynamic extraction: render the episode page and pull a stream URL out of it.
//!
//! Runs under the admission controller. The extraction itself is spawned so a
//! caller that gives up does not cancel a browser task halfway through; the
//! task finishes, closes its context and the result is dropped.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info};

use super::types::{ExtractionResult, SearchResult};
use crate::admission::{AdmissionController, AdmissionError};
use crate::browser::PageRenderer;
use crate::cache::TtlCache;
use crate::error::ScrapeError;
use crate::extractor::{first_capture, resolve_url, ExtractorStrategy};
use crate::fetch::PageFetcher;

static GENERIC_PLAYERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["iframe[src]", "iframe[data-src]", "video[src]", "video source[src]"]
        .iter()
        .map(|css| Selector::parse(css).expect("valid generic player selector"))
        .collect()
});

/// Resolve a candidate and keep it only if it is a fetchable page other than `page_url`.
fn usable(page_url: &str, raw: &str) -> Option<String> {
    let unescaped = raw.replace("\\/", "/").replace("&amp;", "&");
    let url = resolve_url(page_url, &unescaped)?;
    let http = url.starts_with("http://") || url.starts_with("https://");
    (http && url != page_url).then_some(url)
}

fn found(stream_url: String, source: &str, hops: u32) -> ExtractionResult {
    ExtractionResult {
        stream_url,
        source: source.to_string(),
        hops,
    }
}

/// Search a rendered page in priority order: configured player selectors,
/// frames seen in the live DOM, generic iframe/video elements, raw-HTML patterns.
pub fn extract_from_html(
    strategy: &dyn ExtractorStrategy,
    html: &str,
    frame_sources: &[String],
    page_url: &str,
) -> Option<ExtractionResult> {
    let document = Html::parse_document(html);

    for player in strategy.player_selectors() {
        let hit = document
            .select(&player.selector)
            .filter_map(|el| el.value().attr(&player.attr))
            .find_map(|value| usable(page_url, value));
        if let Some(url) = hit {
            return Some(found(url, "player", 0));
        }
    }

    if let Some(url) = frame_sources.iter().find_map(|src| usable(page_url, src)) {
        return Some(found(url, "frame", 0));
    }

    for selector in GENERIC_PLAYERS.iter() {
        let hit = document
            .select(selector)
            .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
            .find_map(|value| usable(page_url, value));
        if let Some(url) = hit {
            return Some(found(url, "element", 0));
        }
    }

    strategy
        .stream_patterns()
        .iter()
        .filter_map(|pattern| first_capture(pattern, html))
        .find_map(|raw| usable(page_url, &raw))
        .map(|url| found(url, "pattern", 0))
}

/// Second-pass search on an indirection page.
pub fn extract_hop(
    strategy: &dyn ExtractorStrategy,
    html: &str,
    frame_sources: &[String],
    page_url: &str,
) -> Option<String> {
    strategy
        .hop_patterns()
        .iter()
        .chain(strategy.stream_patterns())
        .filter_map(|pattern| first_capture(pattern, html))
        .chain(frame_sources.iter().cloned())
        .filter_map(|raw| usable(page_url, &raw))
        .find(|url| !strategy.is_indirection(url))
}

/// The per-episode browser job. Cloned into the spawned task.
#[derive(Clone)]
struct Extraction {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Arc<dyn PageRenderer>,
    strategy: Arc<dyn ExtractorStrategy>,
}

impl Extraction {
    async fn run(&self, episode_url: &str, timeout: Duration) -> Result<ExtractionResult, ScrapeError> {
        let page = self.renderer.render(episode_url, timeout).await?;
        let first = extract_from_html(
            self.strategy.as_ref(),
            &page.html,
            &page.frame_sources,
            &page.final_url,
        )
        .ok_or_else(|| {
            ScrapeError::NotFound(format!(
                "no player or stream pattern matched on {}",
                page.final_url
            ))
        })?;
        debug!("Extracted {} via {}", first.stream_url, first.source);

        if !self.strategy.is_indirection(&first.stream_url) {
            return Ok(first);
        }
        Ok(self.hop(first, &page.final_url, timeout).await)
    }

    /// Follow one indirection page. Out-of-band first, the browser only if that fetch fails.
    async fn hop(&self, first: ExtractionResult, referer: &str, timeout: Duration) -> ExtractionResult {
        let url = first.stream_url.as_str();
        let fetched = tokio::time::timeout(timeout, self.fetcher.fetch_with_referer(url, referer)).await;

        match fetched {
            Ok(Ok(page)) if page.is_success() => {
                match extract_hop(self.strategy.as_ref(), &page.body, &[], &page.final_url) {
                    Some(target) => {
                        debug!("Indirection hop {} -> {}", url, target);
                        return found(target, "hop", 1);
                    }
                    None => {
                        debug!("Indirection page {} had no known source, keeping it", url);
                        return first;
                    }
                }
            }
            Ok(Ok(page)) => debug!("Indirection fetch {} returned HTTP {}", url, page.status),
            Ok(Err(e)) => debug!("Indirection fetch {} failed: {}", url, e),
            Err(_) => debug!("Indirection fetch {} timed out", url),
        }

        match self.renderer.render(url, timeout).await {
            Ok(page) => {
                match extract_hop(self.strategy.as_ref(), &page.html, &page.frame_sources, &page.final_url) {
                    Some(target) => {
                        debug!("Indirection hop via browser {} -> {}", url, target);
                        found(target, "hop", 1)
                    }
                    None => first,
                }
            }
            Err(e) => {
                info!("Could not render indirection page {}: {}", url, e);
                first
            }
        }
    }
}

pub struct DynamicStage {
    job: Extraction,
    admission: Arc<AdmissionController>,
    cache: TtlCache<(String, u32), ExtractionResult>,
    ttl: Duration,
}

impl DynamicStage {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        renderer: Arc<dyn PageRenderer>,
        strategy: Arc<dyn ExtractorStrategy>,
        admission: Arc<AdmissionController>,
        cache_capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            job: Extraction {
                fetcher,
                renderer,
                strategy,
            },
            admission,
            cache: TtlCache::new(cache_capacity),
            ttl,
        }
    }

    /// Extract the stream URL for a located episode page.
    pub async fn extract(
        &self,
        search: &SearchResult,
        episode: u32,
        timeout: Duration,
    ) -> Result<ExtractionResult, ScrapeError> {
        let key = (search.anime_id.clone(), episode);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Stream cache hit for {} episode {}", search.anime_id, episode);
            return Ok(hit);
        }

        let job = self.job.clone();
        let admission = self.admission.clone();
        let url = search.anime_link.clone();
        let task = tokio::spawn(async move { admission.run(|| job.run(&url, timeout)).await });

        let result = match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(AdmissionError::Task(e))) => return Err(e),
            Ok(Err(AdmissionError::Unavailable { retry_after })) => {
                info!("Dynamic extraction denied, breaker open for {:?}", retry_after);
                return Err(ScrapeError::Unavailable(format!(
                    "browser stage paused, retry in {}s",
                    retry_after.as_secs().max(1)
                )));
            }
            Ok(Err(AdmissionError::Closed)) => {
                return Err(ScrapeError::Unavailable("admission closed".to_string()))
            }
            Err(e) => return Err(ScrapeError::Browser(format!("extraction task failed: {}", e))),
        };

        self.cache.set(key, result.clone(), self.ttl);
        Ok(result)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }
}
