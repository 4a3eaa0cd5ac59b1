//! Scripted site and browser used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use animescrape::admission::AdmissionController;
use animescrape::browser::{BrowserError, PageRenderer, RenderedPage};
use animescrape::config::Settings;
use animescrape::extractor::{anime_id_from_url, build_strategy};
use animescrape::fetch::{FetchError, FetchedPage, PageFetcher};
use animescrape::pipeline::{ExtractionPipeline, ScrapeOptions};

pub const BASE: &str = "https://animesite.example";

/// Minimal theme page that passes the episode-page sniff test.
pub const EPISODE_PAGE: &str =
    r#"<html><body><h1>Example Show episode</h1><div id="pembed"></div></body></html>"#;

pub fn not_found(url: &str) -> FetchedPage {
    let mut page = FetchedPage::html(url, "<html><body class=\"error404\">Page not found</body></html>");
    page.status = 404;
    page
}

/// Plain HTTP side of the fake site.
///
/// Scripted responses are served in order; the last one repeats.
#[derive(Default)]
pub struct FakeSite {
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchedPage, FetchError>>>>,
    hits: Mutex<HashMap<String, usize>>,
    /// Answer any `*-episode-N/` URL with [`EPISODE_PAGE`].
    serve_episodes: bool,
    latency: Mutex<Duration>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serving_episodes() -> Self {
        Self {
            serve_episodes: true,
            ..Self::default()
        }
    }

    pub fn page(&self, url: &str, html: &str) {
        self.script(url, vec![Ok(FetchedPage::html(url, html))]);
    }

    pub fn script(&self, url: &str, responses: Vec<Result<FetchedPage, FetchError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
    }

    /// Delay every response by `latency`.
    pub fn slow(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for FakeSite {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut scripts = self.scripts.lock().unwrap();
        if let Some(queue) = scripts.get_mut(url) {
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(response) = next {
                return response;
            }
        }
        if self.serve_episodes && url.starts_with(BASE) && url.contains("-episode-") {
            return Ok(FetchedPage::html(url, EPISODE_PAGE));
        }
        Ok(not_found(url))
    }
}

/// Headless side of the fake site.
///
/// Unscripted URLs render a player iframe named after the page.
#[derive(Default)]
pub struct FakeBrowser {
    pages: Mutex<HashMap<String, RenderedPage>>,
    failure: Mutex<Option<BrowserError>>,
    renders: AtomicUsize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            RenderedPage {
                url: url.to_string(),
                final_url: url.to_string(),
                html: html.to_string(),
                frame_sources: Vec::new(),
            },
        );
    }

    pub fn fail_with(&self, error: BrowserError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

pub fn player_url_for(page_url: &str) -> String {
    format!("https://player.example/e/{}", anime_id_from_url(page_url))
}

#[async_trait]
impl PageRenderer for FakeBrowser {
    async fn render(&self, url: &str, _timeout: Duration) -> Result<RenderedPage, BrowserError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        if let Some(page) = self.pages.lock().unwrap().get(url) {
            return Ok(page.clone());
        }
        Ok(RenderedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            html: format!(
                r#"<div id="pembed"><iframe src="{}"></iframe></div>"#,
                player_url_for(url)
            ),
            frame_sources: Vec::new(),
        })
    }
}

pub fn settings() -> Settings {
    Settings {
        max_concurrency: 2,
        ..Settings::default()
    }
}

pub fn pipeline(
    settings: &Settings,
    site: Arc<FakeSite>,
    browser: Arc<FakeBrowser>,
) -> ExtractionPipeline {
    let strategy = build_strategy(&settings.site).unwrap();
    let admission = Arc::new(AdmissionController::new(
        settings.max_concurrency,
        settings.breaker(),
    ));
    ExtractionPipeline::new(settings, site, browser, strategy, admission)
}

pub fn quick(retries: u32) -> ScrapeOptions {
    ScrapeOptions {
        timeout: Duration::from_secs(5),
        retries,
        retry_delay: Duration::from_millis(10),
    }
}
