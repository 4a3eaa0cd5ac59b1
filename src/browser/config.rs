//! `[browser]` settings. Compiled regardless of the `browser` feature so a
//! settings file written for one build loads in the other.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrowserEngineType {
    /// Inject the scripts in `stealth.rs` into every context.
    #[default]
    Stealth,
    /// Plain Chromium, useful when a patch itself breaks a player.
    Standard,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserEngineConfig {
    #[serde(default)]
    pub engine: BrowserEngineType,

    #[serde(default = "yes")]
    pub headless: bool,

    /// Upstream proxy for all browser traffic, e.g. `socks5://10.0.0.2:1080`.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Seconds a single DevTools command may take.
    #[serde(default = "default_request_timeout", alias = "timeout")]
    pub request_timeout_secs: u64,

    /// Selector that must appear before the DOM is read.
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// Passed to Chromium after the built-in flags.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// DevTools endpoint of an already running browser. No local process is
    /// launched when this is set.
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Pause after load so player scripts can inject their iframes.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn yes() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_window_width() -> u32 {
    1366
}

fn default_window_height() -> u32 {
    768
}

fn default_settle_ms() -> u64 {
    1500
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngineType::default(),
            headless: yes(),
            proxy: None,
            request_timeout_secs: default_request_timeout(),
            wait_for_selector: None,
            chrome_args: Vec::new(),
            remote_url: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl BrowserEngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Layer `BROWSER_URL`, `BROWSER_HEADLESS` and `SOCKS_PROXY` over the
    /// file values. Unrecognised headless values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = env_nonempty("BROWSER_URL") {
            self.remote_url = Some(url);
        }
        if let Some(flag) = env_nonempty("BROWSER_HEADLESS") {
            self.headless = match flag.to_ascii_lowercase().as_str() {
                "0" | "false" | "no" => false,
                "1" | "true" | "yes" => true,
                _ => self.headless,
            };
        }
        if let Some(proxy) = env_nonempty("SOCKS_PROXY") {
            self.proxy = Some(proxy);
        }
        self
    }
}
