//! Site-specific extraction strategies.
//!
//! The pipeline fixes the order of operations; a strategy knows where a given
//! site keeps its episode pages, search results and player iframes.

mod template;
mod wordpress;

pub use template::TemplateSite;
pub use wordpress::WordPressAnimeSite;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::config::{SiteConfig, SiteKind};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid selector {0:?}")]
    InvalidSelector(String),
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("site config incomplete: {0}")]
    Incomplete(String),
}

/// A link found on a search results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    pub url: String,
    pub text: String,
}

/// An episode link found on an anime page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLink {
    pub number: u32,
    pub url: String,
}

/// CSS selector plus the attribute holding the player URL.
#[derive(Debug, Clone)]
pub struct PlayerSelector {
    pub selector: Selector,
    pub attr: String,
}

impl PlayerSelector {
    /// Parse `css` or `css@attr`.
    pub fn parse(spec: &str) -> Result<Self, ExtractorError> {
        let (css, attr) = match spec.rsplit_once('@') {
            Some((css, attr)) if !attr.is_empty() && !attr.contains(']') => (css, attr),
            _ => (spec, "src"),
        };
        let selector =
            Selector::parse(css).map_err(|_| ExtractorError::InvalidSelector(css.to_string()))?;
        Ok(Self {
            selector,
            attr: attr.to_string(),
        })
    }
}

/// Per-site knowledge used by the search and extraction stages.
pub trait ExtractorStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    /// Episode page URL guessed from the title slug, if the site has a predictable layout.
    fn direct_episode_url(&self, slug: &str, episode: u32) -> Option<String>;

    /// Anime overview page guessed from the title slug.
    fn anime_page_url(&self, slug: &str) -> Option<String>;

    fn search_url(&self, query: &str) -> Option<String>;

    fn search_candidates(&self, html: &str, page_url: &str) -> Vec<SearchCandidate>;

    /// Episodes listed on an anime page, sorted by number without duplicates.
    fn episode_links(&self, html: &str, page_url: &str) -> Vec<EpisodeLink>;

    /// Episode page URL derived from an anime page URL when the listing lacks it.
    fn episode_url_from_anime(&self, anime_url: &str, episode: u32) -> Option<String> {
        let _ = (anime_url, episode);
        None
    }

    /// Whether a successfully fetched page is a real episode page.
    fn looks_like_episode_page(&self, html: &str) -> bool {
        !html.is_empty()
    }

    /// Player containers, highest priority first.
    fn player_selectors(&self) -> &[PlayerSelector];

    /// Raw-HTML stream patterns, used when no selector matched.
    fn stream_patterns(&self) -> &[Regex];

    /// Hosts that only wrap the real player.
    fn indirection_domains(&self) -> &[String];

    /// Patterns applied to an indirection page to find the real player.
    fn hop_patterns(&self) -> &[Regex];

    /// Extra hosts the protection check treats as embeddable.
    fn exempt_hosts(&self) -> &[String] {
        &[]
    }

    /// Stable anime id derived from its page URL (last path segment).
    fn anime_id(&self, anime_url: &str) -> String {
        anime_id_from_url(anime_url)
    }

    fn is_indirection(&self, url: &str) -> bool {
        host_matches(url, self.indirection_domains())
    }
}

/// Build the strategy a site config asks for.
pub fn build_strategy(config: &SiteConfig) -> Result<Arc<dyn ExtractorStrategy>, ExtractorError> {
    Ok(match config.kind {
        SiteKind::Wordpress => Arc::new(WordPressAnimeSite::from_config(config)?),
        SiteKind::Template => Arc::new(TemplateSite::from_config(config)?),
    })
}

static EPISODE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:episode|ep)[\s\-_.]*(\d{1,4})").unwrap());
static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,4})\D*$").unwrap());

/// Episode number from link text or URL: "Episode 12", "ep-12", or a bare trailing number.
pub fn parse_episode_number(text: &str, href: &str) -> Option<u32> {
    for source in [text, href] {
        if let Some(n) = EPISODE_NUMBER
            .captures(source)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return Some(n);
        }
    }
    TRAILING_NUMBER
        .captures(text.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Resolve `href` against `base`, skipping fragments and script links.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("data:")
    {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .map(|u| u.to_string())
}

/// Whether `url`'s host is one of `domains` or a subdomain of one.
pub fn host_matches(url: &str, domains: &[String]) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
        return false;
    };
    domains.iter().any(|d| {
        let d = d.trim().trim_start_matches('.').to_lowercase();
        !d.is_empty() && (host == d || host.ends_with(&format!(".{}", d)))
    })
}

/// Last non-empty path segment of a URL.
pub fn anime_id_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| url.trim_end_matches('/').rsplit('/').next().unwrap_or(url).to_string())
}

/// First match of `pattern` in `text`, preferring capture group 1.
pub fn first_capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures_iter(text).find_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

pub(crate) fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ExtractorError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ExtractorError::InvalidPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

pub(crate) fn compile_selectors(specs: &[String]) -> Result<Vec<PlayerSelector>, ExtractorError> {
    specs.iter().map(|s| PlayerSelector::parse(s)).collect()
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, ExtractorError> {
    Selector::parse(css).map_err(|_| ExtractorError::InvalidSelector(css.to_string()))
}

/// Collect `(href, text)` links matching `selector`, resolved against `page_url`.
pub(crate) fn collect_links(html: &str, page_url: &str, selector: &Selector) -> Vec<SearchCandidate> {
    let document = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for element in document.select(selector) {
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_url(page_url, href))
        else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let text = element
            .value()
            .attr("title")
            .map(str::to_string)
            .unwrap_or_else(|| element.text().collect::<Vec<_>>().join(" "));
        out.push(SearchCandidate {
            url,
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
        });
    }
    out
}

/// Turn links into sorted, de-duplicated episode links.
pub(crate) fn to_episode_links(links: Vec<SearchCandidate>) -> Vec<EpisodeLink> {
    let mut episodes: Vec<EpisodeLink> = links
        .into_iter()
        .filter_map(|link| {
            parse_episode_number(&link.text, &link.url).map(|number| EpisodeLink {
                number,
                url: link.url,
            })
        })
        .filter(|e| e.number > 0)
        .collect();
    episodes.sort_by_key(|e| e.number);
    episodes.dedup_by_key(|e| e.number);
    episodes
}

/// Fill `{base}`, `{slug}`, `{episode}` and `{query}` placeholders.
pub(crate) fn fill_template(template: &str, base: &str, slug: &str, episode: u32, query: &str) -> String {
    template
        .replace("{base}", base.trim_end_matches('/'))
        .replace("{slug}", slug)
        .replace("{episode}", &episode.to_string())
        .replace("{query}", &urlencoding::encode(query))
}
