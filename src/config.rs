//! Configuration management using the prefer crate for discovery.
//!
//! Settings come from (in order): an explicit `--config` file, a discovered
//! `animescrape.{toml,yaml,json,...}` file, or built-in defaults. Environment
//! variables are applied last and win over both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::admission::BreakerConfig;
use crate::browser::BrowserEngineConfig;

/// Which extractor strategy drives the target site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// Preset layout of the common WordPress anime themes.
    #[default]
    Wordpress,
    /// Everything supplied by the templates and patterns below.
    Template,
}

/// Target site description.
///
/// URL templates accept `{base}`, `{slug}`, `{episode}` and `{query}`.
/// Player selectors are `css` or `css@attribute` (default attribute `src`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    #[serde(default)]
    pub kind: SiteKind,

    #[serde(default = "default_site_url")]
    pub base_url: String,

    /// Direct episode page, e.g. `{base}/{slug}-episode-{episode}`.
    #[serde(default)]
    pub episode_url: Option<String>,

    /// Anime overview page, e.g. `{base}/category/{slug}`.
    #[serde(default)]
    pub anime_url: Option<String>,

    /// Keyword search page, e.g. `{base}/search.html?keyword={query}`.
    #[serde(default)]
    pub search_url: Option<String>,

    /// Links on the search page that point at anime pages.
    #[serde(default)]
    pub search_result_selector: Option<String>,

    /// Links on an anime page that point at episodes.
    #[serde(default)]
    pub episode_link_selector: Option<String>,

    #[serde(default)]
    pub player_selectors: Vec<String>,

    /// Regexes run over raw HTML; capture group 1 is the URL if present.
    #[serde(default)]
    pub stream_patterns: Vec<String>,

    /// Hosts whose pages only wrap the real player.
    #[serde(default)]
    pub indirection_domains: Vec<String>,

    /// Regexes applied to an indirection page fetched out-of-band.
    #[serde(default)]
    pub hop_patterns: Vec<String>,

    /// Extra hosts known to allow embedding.
    #[serde(default)]
    pub exempt_hosts: Vec<String>,
}

fn default_site_url() -> String {
    "https://animesite.example".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            kind: SiteKind::default(),
            base_url: default_site_url(),
            episode_url: None,
            anime_url: None,
            search_url: None,
            search_result_selector: None,
            episode_link_selector: None,
            player_selectors: Vec::new(),
            stream_patterns: Vec::new(),
            indirection_domains: Vec::new(),
            hop_patterns: Vec::new(),
            exempt_hosts: Vec::new(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Dynamic extraction tasks allowed to run at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Consecutive browser-stage failures that open the breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// Entries per cache (search results and stream URLs are cached separately).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_search_cache_ttl_secs")]
    pub search_cache_ttl_secs: u64,

    #[serde(default = "default_stream_cache_ttl_secs")]
    pub stream_cache_ttl_secs: u64,

    /// Plain HTTP timeout for search and protection fetches. Also caps a
    /// longer per-call timeout for those stages.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Browser navigation timeout.
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Attempts per episode, including the first.
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Pause between episodes of a bulk chunk.
    #[serde(default = "default_episode_delay_ms")]
    pub episode_delay_ms: u64,

    /// Episode cap for whole-series scrapes.
    #[serde(default = "default_max_episodes")]
    pub max_episodes: u32,

    /// Episodes scraped side by side in a whole-series scrape.
    #[serde(default = "default_series_parallelism")]
    pub series_parallelism: usize,

    /// `None` for the default desktop Chrome, "impersonate" to rotate, or a literal string.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// SQLite database for jobs and episodes.
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    /// File these settings were read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    3
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown_secs() -> u64 {
    60
}
fn default_cache_capacity() -> usize {
    500
}
fn default_search_cache_ttl_secs() -> u64 {
    10 * 60
}
fn default_stream_cache_ttl_secs() -> u64 {
    60 * 60
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_navigation_timeout_secs() -> u64 {
    20
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_chunk_size() -> u32 {
    50
}
fn default_episode_delay_ms() -> u64 {
    3_000
}
fn default_max_episodes() -> u32 {
    24
}
fn default_series_parallelism() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            cache_capacity: default_cache_capacity(),
            search_cache_ttl_secs: default_search_cache_ttl_secs(),
            stream_cache_ttl_secs: default_stream_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            chunk_size: default_chunk_size(),
            episode_delay_ms: default_episode_delay_ms(),
            max_episodes: default_max_episodes(),
            series_parallelism: default_series_parallelism(),
            user_agent: None,
            database: None,
            site: SiteConfig::default(),
            browser: BrowserEngineConfig::default(),
            source_path: None,
        }
    }
}

/// Parse an env var, ignoring empty or malformed values.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok().filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

impl Settings {
    /// Load settings: explicit path if given, else discovery, then env overrides.
    pub async fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match explicit {
            Some(path) => Self::load_from_path(path)
                .await
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Self::discover().await,
        };
        Ok(settings.with_env_overrides())
    }

    /// Discover a config file with prefer, falling back to defaults.
    async fn discover() -> Self {
        match prefer::load("animescrape").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(settings) => settings,
                    Err(e) => {
                        warn!("Ignoring unreadable config {}: {:#}", path.display(), e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load settings from a file. Format follows the extension (TOML, YAML, else JSON).
    pub async fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut settings: Settings = match ext {
            "toml" => toml::from_str(&contents).context("Failed to parse TOML config")?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
            }
            _ => serde_json::from_str(&contents).context("Failed to parse JSON config")?,
        };

        settings.source_path = Some(path.to_path_buf());
        debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("SCRAPER_MAX_CONCURRENCY") {
            self.max_concurrency = v;
        }
        if let Some(v) = env_parse("SCRAPER_BREAKER_THRESHOLD") {
            self.breaker_threshold = v;
        }
        if let Some(v) = env_parse("SCRAPER_BREAKER_COOLDOWN_SECS") {
            self.breaker_cooldown_secs = v;
        }
        if let Some(v) = env_parse("SCRAPER_CACHE_CAPACITY") {
            self.cache_capacity = v;
        }
        if let Some(v) = env_parse("SCRAPER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_parse("SCRAPER_NAVIGATION_TIMEOUT_SECS") {
            self.navigation_timeout_secs = v;
        }
        if let Some(v) = env_parse("SCRAPER_RETRIES") {
            self.retries = v;
        }
        if let Some(v) = env_parse("SCRAPER_RETRY_DELAY_MS") {
            self.retry_delay_ms = v;
        }
        if let Some(v) = env_parse("SCRAPER_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = env_parse("SCRAPER_EPISODE_DELAY_MS") {
            self.episode_delay_ms = v;
        }
        if let Some(v) = env_string("SCRAPER_SITE_URL") {
            self.site.base_url = v;
        }
        if let Some(v) = env_string("SCRAPER_USER_AGENT") {
            self.user_agent = Some(v);
        }
        if let Some(v) = env_string("SCRAPER_DATABASE") {
            self.database = Some(PathBuf::from(v));
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    /// Database path, defaulting to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("animescrape")
                .join("scrape.db")
        })
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.breaker_threshold,
            cooldown: self.breaker_cooldown(),
        }
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn episode_delay(&self) -> Duration {
        Duration::from_millis(self.episode_delay_ms)
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    pub fn stream_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "SCRAPER_MAX_CONCURRENCY",
        "SCRAPER_BREAKER_THRESHOLD",
        "SCRAPER_CHUNK_SIZE",
        "SCRAPER_SITE_URL",
        "SCRAPER_RETRIES",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.max_concurrency, 3);
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.chunk_size, 50);
        assert!(settings.search_cache_ttl() < settings.stream_cache_ttl());
        assert_eq!(settings.breaker().threshold, 5);
    }

    #[test]
    fn env_overrides_win() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("SCRAPER_MAX_CONCURRENCY", "7");
        std::env::set_var("SCRAPER_SITE_URL", "https://mirror.example");
        std::env::set_var("SCRAPER_CHUNK_SIZE", "not-a-number");

        let settings = Settings::default().with_env_overrides();
        assert_eq!(settings.max_concurrency, 7);
        assert_eq!(settings.site.base_url, "https://mirror.example");
        assert_eq!(settings.chunk_size, 50);

        clear_env();
    }

    #[tokio::test]
    async fn loads_toml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
max_concurrency = 2
retries = 5

[site]
kind = "template"
base_url = "https://template.example"
episode_url = "{{base}}/watch/{{slug}}/{{episode}}"

[browser]
headless = false
"#
        )
        .unwrap();

        let settings = Settings::load_from_path(file.path()).await.unwrap();
        assert_eq!(settings.max_concurrency, 2);
        assert_eq!(settings.retries, 5);
        assert_eq!(settings.chunk_size, 50);
        assert_eq!(settings.site.kind, SiteKind::Template);
        assert_eq!(
            settings.site.episode_url.as_deref(),
            Some("{base}/watch/{slug}/{episode}")
        );
        assert!(!settings.browser.headless);
        assert_eq!(settings.source_path.as_deref(), Some(file.path()));
    }

    #[tokio::test]
    async fn loads_yaml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "episode_delay_ms: 10\nsite:\n  base_url: https://yaml.example").unwrap();

        let settings = Settings::load_from_path(file.path()).await.unwrap();
        assert_eq!(settings.episode_delay(), Duration::from_millis(10));
        assert_eq!(settings.site.base_url, "https://yaml.example");
        assert_eq!(settings.site.kind, SiteKind::Wordpress);
    }

    #[tokio::test]
    async fn malformed_explicit_config_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, "{{ not json").unwrap();
        assert!(Settings::load(Some(file.path())).await.is_err());
    }
}
