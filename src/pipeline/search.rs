//! Search stage: locate the episode page with plain HTTP and DOM parsing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::types::{SearchMethod, SearchResult};
use crate::cache::TtlCache;
use crate::error::ScrapeError;
use crate::extractor::{anime_id_from_url, EpisodeLink, ExtractorStrategy, SearchCandidate};
use crate::fetch::{fetch_within, PageFetcher};

/// Score for a candidate whose slug equals the query slug.
const EXACT_MATCH_SCORE: u32 = 1000;

/// Lowercase, ASCII-alphanumeric, dash separated. Apostrophes are dropped.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn tokens(text: &str) -> HashSet<String> {
    slugify(text)
        .split('-')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Cache key form of a title.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Rank search candidates against a query, best first. Zero-score candidates are dropped.
///
/// An exact slug match (by link text or by the URL's last segment) wins outright.
/// Otherwise the score is the share of query words present in the candidate;
/// ties go to the candidate with fewer extra words.
pub fn rank_candidates(query: &str, candidates: Vec<SearchCandidate>) -> Vec<(u32, SearchCandidate)> {
    let query_slug = slugify(query);
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(u32, usize, SearchCandidate)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let url_slug = anime_id_from_url(&candidate.url);
            if slugify(&candidate.text) == query_slug || url_slug == query_slug {
                return Some((EXACT_MATCH_SCORE, 0, candidate));
            }
            let mut candidate_tokens = tokens(&candidate.text);
            candidate_tokens.extend(tokens(&url_slug));
            let overlap = query_tokens.intersection(&candidate_tokens).count();
            if overlap == 0 {
                return None;
            }
            let score = (overlap * 100 / query_tokens.len()) as u32;
            let extra = candidate_tokens.len().saturating_sub(overlap);
            Some((score, extra, candidate))
        })
        .collect();

    // Stable sort keeps page order among equals
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(score, _, c)| (score, c)).collect()
}

/// An anime overview page and the episodes it lists.
#[derive(Debug, Clone)]
pub struct AnimePage {
    pub url: String,
    pub anime_id: String,
    pub episodes: Vec<EpisodeLink>,
}

pub struct SearchStage {
    fetcher: Arc<dyn PageFetcher>,
    strategy: Arc<dyn ExtractorStrategy>,
    cache: TtlCache<(String, u32), SearchResult>,
    ttl: Duration,
}

impl SearchStage {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        strategy: Arc<dyn ExtractorStrategy>,
        cache_capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            strategy,
            cache: TtlCache::new(cache_capacity),
            ttl,
        }
    }

    /// Resolve the episode page for `(title, episode)`.
    pub async fn search(
        &self,
        title: &str,
        episode: u32,
        timeout: Duration,
    ) -> Result<SearchResult, ScrapeError> {
        let key = (normalize_title(title), episode);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Search cache hit for {:?} episode {}", title, episode);
            return Ok(hit);
        }

        let slug = slugify(title);
        let result = match self.direct(&slug, episode, timeout).await {
            Some(result) => result,
            None => self.keyword(title, episode, timeout).await?,
        };

        self.cache.set(key, result.clone(), self.ttl);
        Ok(result)
    }

    /// Probe the slug-derived episode URL. Any failure just means "not here".
    async fn direct(&self, slug: &str, episode: u32, timeout: Duration) -> Option<SearchResult> {
        if slug.is_empty() {
            return None;
        }
        let url = self.strategy.direct_episode_url(slug, episode)?;
        match fetch_within(self.fetcher.as_ref(), &url, timeout).await {
            Ok(page) if page.is_success() && self.strategy.looks_like_episode_page(&page.body) => {
                debug!("Direct URL hit: {}", url);
                Some(SearchResult {
                    anime_link: page.final_url,
                    anime_id: slug.to_string(),
                    anime_page: None,
                    method: SearchMethod::Direct,
                })
            }
            Ok(page) => {
                debug!("Direct URL miss: {} (status {})", url, page.status);
                None
            }
            Err(e) => {
                debug!("Direct URL probe failed: {}", e);
                None
            }
        }
    }

    async fn keyword(
        &self,
        title: &str,
        episode: u32,
        timeout: Duration,
    ) -> Result<SearchResult, ScrapeError> {
        let anime = self.find_anime_page(title, timeout).await?;

        let episode_url = anime
            .episodes
            .iter()
            .find(|e| e.number == episode)
            .map(|e| e.url.clone())
            .or_else(|| self.strategy.episode_url_from_anime(&anime.url, episode))
            .ok_or_else(|| {
                ScrapeError::SearchFailed(format!(
                    "episode {} not listed on {}",
                    episode, anime.url
                ))
            })?;

        info!("Resolved {:?} episode {} via search: {}", title, episode, episode_url);
        Ok(SearchResult {
            anime_link: episode_url,
            anime_id: anime.anime_id,
            anime_page: Some(anime.url),
            method: SearchMethod::Keyword,
        })
    }

    /// Find the anime overview page: slug-derived URL first, then keyword search.
    pub async fn anime_page(&self, title: &str, timeout: Duration) -> Result<AnimePage, ScrapeError> {
        let slug = slugify(title);
        if let Some(url) = (!slug.is_empty())
            .then(|| self.strategy.anime_page_url(&slug))
            .flatten()
        {
            if let Ok(page) = fetch_within(self.fetcher.as_ref(), &url, timeout).await {
                if page.is_success() {
                    let episodes = self.strategy.episode_links(&page.body, &page.final_url);
                    if !episodes.is_empty() {
                        debug!("Anime page found directly: {}", url);
                        return Ok(AnimePage {
                            anime_id: self.strategy.anime_id(&page.final_url),
                            url: page.final_url,
                            episodes,
                        });
                    }
                }
            }
        }
        self.find_anime_page(title, timeout).await
    }

    async fn find_anime_page(&self, title: &str, timeout: Duration) -> Result<AnimePage, ScrapeError> {
        let search_url = self.strategy.search_url(title).ok_or_else(|| {
            ScrapeError::SearchFailed(format!("{} has no keyword search", self.strategy.name()))
        })?;

        let page = fetch_within(self.fetcher.as_ref(), &search_url, timeout).await?;
        if !page.is_success() {
            return Err(ScrapeError::SearchFailed(format!(
                "search returned HTTP {}",
                page.status
            )));
        }

        let candidates = self.strategy.search_candidates(&page.body, &page.final_url);
        let ranked = rank_candidates(title, candidates);
        let (score, best) = ranked.into_iter().next().ok_or_else(|| {
            ScrapeError::SearchFailed(format!("no search results match {:?}", title))
        })?;
        debug!("Best search candidate (score {}): {} {:?}", score, best.url, best.text);

        let anime = fetch_within(self.fetcher.as_ref(), &best.url, timeout).await?;
        if !anime.is_success() {
            return Err(ScrapeError::SearchFailed(format!(
                "anime page {} returned HTTP {}",
                best.url, anime.status
            )));
        }

        Ok(AnimePage {
            anime_id: self.strategy.anime_id(&anime.final_url),
            episodes: self.strategy.episode_links(&anime.body, &anime.final_url),
            url: anime.final_url,
        })
    }

    /// Seed the cache with an episode page found some other way (an anime page listing).
    pub fn remember(&self, title: &str, episode: u32, result: SearchResult) {
        self.cache.set((normalize_title(title), episode), result, self.ttl);
    }

    pub fn forget(&self, title: &str, episode: u32) {
        self.cache.remove(&(normalize_title(title), episode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, text: &str) -> SearchCandidate {
        SearchCandidate {
            url: url.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("One Piece"), "one-piece");
        assert_eq!(slugify("  Frieren: Beyond Journey's End "), "frieren-beyond-journeys-end");
        assert_eq!(slugify("Re:Zero -Starting Life-"), "re-zero-starting-life");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn titles_normalize_for_cache() {
        assert_eq!(normalize_title("  One   PIECE "), "one piece");
    }

    #[test]
    fn exact_slug_beats_overlap() {
        let ranked = rank_candidates(
            "Naruto",
            vec![
                candidate("https://s.example/anime/naruto-shippuden/", "Naruto Shippuden"),
                candidate("https://s.example/anime/naruto/", "Naruto (TV)"),
            ],
        );
        assert_eq!(ranked[0].0, EXACT_MATCH_SCORE);
        assert_eq!(ranked[0].1.url, "https://s.example/anime/naruto/");
    }

    #[test]
    fn overlap_prefers_tighter_match() {
        let ranked = rank_candidates(
            "spy family",
            vec![
                candidate("https://s.example/a/1", "Spy x Family Season 2 Special Edition"),
                candidate("https://s.example/a/2", "Spy x Family"),
                candidate("https://s.example/a/3", "Unrelated Show"),
            ],
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1.url, "https://s.example/a/2");
        assert_eq!(ranked[0].0, 100);
    }

    #[test]
    fn no_overlap_no_candidates() {
        let ranked = rank_candidates("bleach", vec![candidate("https://s.example/x", "Other")]);
        assert!(ranked.is_empty());
    }
}
