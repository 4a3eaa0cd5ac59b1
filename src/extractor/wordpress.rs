//! Preset strategy for WordPress anime themes (AnimeStream, Gogo clones and similar).

use regex::Regex;
use scraper::Selector;

use super::{
    collect_links, compile_patterns, compile_selectors, parse_selector, to_episode_links,
    EpisodeLink, ExtractorError, ExtractorStrategy, PlayerSelector, SearchCandidate,
};
use crate::config::SiteConfig;

const SEARCH_RESULT_SELECTOR: &str = "article.bs a[href], .listupd article a[href], \
     ul.items li p.name a[href], .film-name a[href], article h2 a[href], h3.entry-title a[href]";

const EPISODE_LINK_SELECTOR: &str = ".eplister li a[href], #episode_page a[href], \
     ul#episode_related li a[href], .episodes-list a[href], .episodelist a[href]";

const PLAYER_SELECTORS: &[&str] = &[
    "#pembed iframe",
    ".player-embed iframe",
    ".play-video iframe",
    "#player iframe",
    ".anime_muti_link li a[data-video]@data-video",
    "#episode-servers li[data-video]@data-video",
    ".mirror option[data-embed]@data-embed",
];

const STREAM_PATTERNS: &[&str] = &[
    r#"(?i)["']?(?:file|source|src)["']?\s*[:=]\s*["'](https?://[^"']+\.(?:m3u8|mp4)[^"']*)["']"#,
    r#"(?i)(https?://[^\s"'<>\\]+\.m3u8(?:\?[^\s"'<>\\]*)?)"#,
    r#"(?i)(https?://[^\s"'<>\\]+\.mp4(?:\?[^\s"'<>\\]*)?)"#,
    r#"(?i)<iframe[^>]+src=["']((?:https?:)?//[^"']+)["']"#,
];

const INDIRECTION_DOMAINS: &[&str] = &[
    "gogoplay.io",
    "goload.io",
    "playtaku.net",
    "embtaku.pro",
    "anihdplay.com",
    "gogohd.net",
];

const HOP_PATTERNS: &[&str] = &[
    r#"(?i)data-video=["']([^"']+)["']"#,
    r#"(?i)sources\s*:\s*\[\s*\{\s*file\s*:\s*["']([^"']+)["']"#,
    r#"(?i)<iframe[^>]+src=["']([^"']+)["']"#,
];

/// Markers of a theme page that is not an episode (404 template, empty search).
const NOT_EPISODE_MARKERS: &[&str] = &[
    "error404",
    "Page not found",
    "Nothing Found",
    "Oops! That page can",
];

pub struct WordPressAnimeSite {
    base_url: String,
    search_results: Selector,
    episode_links: Selector,
    players: Vec<PlayerSelector>,
    stream_patterns: Vec<Regex>,
    indirection_domains: Vec<String>,
    hop_patterns: Vec<Regex>,
    exempt_hosts: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl WordPressAnimeSite {
    pub fn new(base_url: &str) -> Result<Self, ExtractorError> {
        Self::from_config(&SiteConfig {
            base_url: base_url.to_string(),
            ..SiteConfig::default()
        })
    }

    /// Presets plus whatever selectors, patterns and domains the config adds.
    /// Configured entries take priority over the presets.
    pub fn from_config(config: &SiteConfig) -> Result<Self, ExtractorError> {
        let mut players = compile_selectors(&config.player_selectors)?;
        players.extend(compile_selectors(&owned(PLAYER_SELECTORS))?);

        let mut stream_patterns = compile_patterns(&config.stream_patterns)?;
        stream_patterns.extend(compile_patterns(&owned(STREAM_PATTERNS))?);

        let mut hop_patterns = compile_patterns(&config.hop_patterns)?;
        hop_patterns.extend(compile_patterns(&owned(HOP_PATTERNS))?);

        let mut indirection_domains = config.indirection_domains.clone();
        indirection_domains.extend(owned(INDIRECTION_DOMAINS));

        let search_results = parse_selector(
            config
                .search_result_selector
                .as_deref()
                .unwrap_or(SEARCH_RESULT_SELECTOR),
        )?;
        let episode_links = parse_selector(
            config
                .episode_link_selector
                .as_deref()
                .unwrap_or(EPISODE_LINK_SELECTOR),
        )?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_results,
            episode_links,
            players,
            stream_patterns,
            indirection_domains,
            hop_patterns,
            exempt_hosts: config.exempt_hosts.clone(),
        })
    }
}

impl ExtractorStrategy for WordPressAnimeSite {
    fn name(&self) -> &str {
        "wordpress"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn direct_episode_url(&self, slug: &str, episode: u32) -> Option<String> {
        Some(format!("{}/{}-episode-{}/", self.base_url, slug, episode))
    }

    fn anime_page_url(&self, slug: &str) -> Option<String> {
        Some(format!("{}/anime/{}/", self.base_url, slug))
    }

    fn search_url(&self, query: &str) -> Option<String> {
        Some(format!("{}/?s={}", self.base_url, urlencoding::encode(query)))
    }

    fn search_candidates(&self, html: &str, page_url: &str) -> Vec<SearchCandidate> {
        collect_links(html, page_url, &self.search_results)
            .into_iter()
            .filter(|c| !c.url.contains("-episode-"))
            .collect()
    }

    fn episode_links(&self, html: &str, page_url: &str) -> Vec<EpisodeLink> {
        to_episode_links(collect_links(html, page_url, &self.episode_links))
    }

    fn episode_url_from_anime(&self, anime_url: &str, episode: u32) -> Option<String> {
        let slug = self.anime_id(anime_url);
        self.direct_episode_url(&slug, episode)
    }

    fn looks_like_episode_page(&self, html: &str) -> bool {
        if NOT_EPISODE_MARKERS.iter().any(|m| html.contains(m)) {
            return false;
        }
        html.contains("<iframe") || html.contains("data-video") || html.contains("episode")
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
