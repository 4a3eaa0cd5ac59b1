//! Strategy driven entirely by configuration.

use regex::Regex;
use scraper::Selector;

use super::{
    collect_links, compile_patterns, compile_selectors, fill_template, parse_selector,
    to_episode_links, EpisodeLink, ExtractorError, ExtractorStrategy, PlayerSelector,
    SearchCandidate,
};
use crate::config::SiteConfig;

/// Fallbacks when the config names no player selectors or stream patterns.
const GENERIC_PLAYERS: &[&str] = &["iframe[src]", "video[src]", "video source[src]"];
const GENERIC_STREAMS: &[&str] = &[r#"(?i)(https?://[^\s"'<>\\]+\.(?:m3u8|mp4)(?:\?[^\s"'<>\\]*)?)"#];

pub struct TemplateSite {
    base_url: String,
    episode_url: Option<String>,
    anime_url: Option<String>,
    search_url: Option<String>,
    search_results: Selector,
    episode_links: Selector,
    players: Vec<PlayerSelector>,
    stream_patterns: Vec<Regex>,
    indirection_domains: Vec<String>,
    hop_patterns: Vec<Regex>,
    exempt_hosts: Vec<String>,
}

impl TemplateSite {
    pub fn from_config(config: &SiteConfig) -> Result<Self, ExtractorError> {
        if config.episode_url.is_none() && config.search_url.is_none() {
            return Err(ExtractorError::Incomplete(
                "template site needs episode_url or search_url".to_string(),
            ));
        }

        let players = if config.player_selectors.is_empty() {
            compile_selectors(&GENERIC_PLAYERS.iter().map(|s| s.to_string()).collect::<Vec<_>>())?
        } else {
            compile_selectors(&config.player_selectors)?
        };
        let stream_patterns = if config.stream_patterns.is_empty() {
            compile_patterns(&GENERIC_STREAMS.iter().map(|s| s.to_string()).collect::<Vec<_>>())?
        } else {
            compile_patterns(&config.stream_patterns)?
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            episode_url: config.episode_url.clone(),
            anime_url: config.anime_url.clone(),
            search_url: config.search_url.clone(),
            search_results: parse_selector(
                config.search_result_selector.as_deref().unwrap_or("a[href]"),
            )?,
            episode_links: parse_selector(
                config.episode_link_selector.as_deref().unwrap_or("a[href]"),
            )?,
            players,
            stream_patterns,
            indirection_domains: config.indirection_domains.clone(),
            hop_patterns: compile_patterns(&config.hop_patterns)?,
            exempt_hosts: config.exempt_hosts.clone(),
        })
    }
}

impl ExtractorStrategy for TemplateSite {
    fn name(&self) -> &str {
        "template"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn direct_episode_url(&self, slug: &str, episode: u32) -> Option<String> {
        self.episode_url
            .as_deref()
            .map(|t| fill_template(t, &self.base_url, slug, episode, ""))
    }

    fn anime_page_url(&self, slug: &str) -> Option<String> {
        self.anime_url
            .as_deref()
            .map(|t| fill_template(t, &self.base_url, slug, 0, ""))
    }

    fn search_url(&self, query: &str) -> Option<String> {
        self.search_url
            .as_deref()
            .map(|t| fill_template(t, &self.base_url, "", 0, query))
    }

    fn search_candidates(&self, html: &str, page_url: &str) -> Vec<SearchCandidate> {
        collect_links(html, page_url, &self.search_results)
    }

    fn episode_links(&self, html: &str, page_url: &str) -> Vec<EpisodeLink> {
        to_episode_links(collect_links(html, page_url, &self.episode_links))
    }

    fn episode_url_from_anime(&self, anime_url: &str, episode: u32) -> Option<String> {
        // Only meaningful when the episode template is keyed by the same slug
        self.episode_url.as_deref().map(|t| {
            fill_template(t, &self.base_url, &self.anime_id(anime_url), episode, "")
        })
    }

    fn player_selectors(&self) -> &[PlayerSelector] {
        &self.players
    }

    fn stream_patterns(&self) -> &[Regex] {
        &self.stream_patterns
    }

    fn indirection_domains(&self) -> &[String] {
        &self.indirection_domains
    }

    fn hop_patterns(&self) -> &[Regex] {
        &self.hop_patterns
    }

    fn exempt_hosts(&self) -> &[String] {
        &self.exempt_hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteKind;

    fn config() -> SiteConfig {
        SiteConfig {
            kind: SiteKind::Template,
            base_url: "https://tpl.example/".into(),
            episode_url: Some("{base}/watch/{slug}/ep-{episode}".into()),
            anime_url: Some("{base}/series/{slug}".into()),
            search_url: Some("{base}/search?keyword={query}".into()),
            search_result_selector: Some("div.result a".into()),
            episode_link_selector: Some("ul.eps a".into()),
            player_selectors: vec!["div#video iframe".into()],
            ..SiteConfig::default()
        }
    }

    #[test]
    fn requires_an_entry_point() {
        let config = SiteConfig {
            kind: SiteKind::Template,
            ..SiteConfig::default()
        };
        assert!(matches!(
            TemplateSite::from_config(&config),
            Err(ExtractorError::Incomplete(_))
        ));
    }

    #[test]
    fn fills_templates() {
        let site = TemplateSite::from_config(&config()).unwrap();
        assert_eq!(
            site.direct_episode_url("bleach", 2).as_deref(),
            Some("https://tpl.example/watch/bleach/ep-2")
        );
        assert_eq!(
            site.anime_page_url("bleach").as_deref(),
            Some("https://tpl.example/series/bleach")
        );
        assert_eq!(
            site.search_url("bleach tybw").as_deref(),
            Some("https://tpl.example/search?keyword=bleach%20tybw")
        );
    }

    #[test]
    fn uses_configured_selectors() {
        let site = TemplateSite::from_config(&config()).unwrap();
        let html = r#"<div class="result"><a href="/series/bleach">Bleach</a></div>
                      <a href="/about">About</a>"#;
        let candidates = site.search_candidates(html, "https://tpl.example/search?keyword=bleach");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://tpl.example/series/bleach");

        let html = r#"<ul class="eps"><li><a href="/watch/bleach/ep-1">Episode 1</a></li></ul>"#;
        let episodes = site.episode_links(html, "https://tpl.example/series/bleach");
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].number, 1);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut config = config();
        config.stream_patterns = vec!["(unclosed".into()];
        assert!(matches!(
            TemplateSite::from_config(&config),
            Err(ExtractorError::InvalidPattern { .. })
        ));
    }
}
