//! The shared browser process and its CDP connection.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::CloseParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::handler::{Handler, HandlerConfig};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::BrowsingContext;
use super::slot::SessionHealth;
use super::{BrowserEngineConfig, BrowserError};

/// How long the liveness probe may take before the session counts as dead.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Flags that hide automation from page scripts and keep Chrome quiet in containers.
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--mute-audio",
    "--autoplay-policy=no-user-gesture-required",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-gpu",
    "--disable-software-rasterizer",
];

/// Find a Chrome executable on disk or in PATH.
fn find_chrome() -> Result<PathBuf, BrowserError> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in CHROME_COMMANDS {
        if let Ok(path) = which::which(cmd) {
            info!("Found Chrome in PATH: {}", path.display());
            return Ok(path);
        }
    }

    Err(BrowserError::Launch(
        "Chrome/Chromium not found. Install chromium or set BROWSER_URL to a remote DevTools endpoint"
            .to_string(),
    ))
}

/// A running (or connected) browser.
///
/// Never mutated after construction; a broken session is replaced, not repaired.
pub struct BrowserSession {
    browser: Browser,
    alive: Arc<AtomicBool>,
    handler: JoinHandle<()>,
    remote: bool,
}

impl BrowserSession {
    /// Launch a local browser, or connect to `config.remote_url` if set.
    pub async fn launch(config: &BrowserEngineConfig) -> Result<Self, BrowserError> {
        if let Some(remote_url) = config.remote_url.as_deref() {
            return Self::connect_remote(config, remote_url).await;
        }

        info!("Launching browser (headless={})", config.headless);
        let chrome_path = find_chrome()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(config.request_timeout())
            .window_size(config.window_width, config.window_height);

        // with_head means NOT headless
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        for arg in &config.chrome_args {
            builder = builder.arg(arg.as_str());
        }

        let browser_config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Self::from_parts(browser, handler, false))
    }

    async fn connect_remote(config: &BrowserEngineConfig, url: &str) -> Result<Self, BrowserError> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, config.request_timeout_secs
        );

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(config.request_timeout())
            .send()
            .await
            .map_err(|e| BrowserError::Launch(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| BrowserError::Launch(format!("bad version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Launch("no webSocketDebuggerUrl in response".into()))?;

        debug!("Connecting to WebSocket: {}", ws_url);

        let handler_config = HandlerConfig {
            request_timeout: config.request_timeout(),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Self::from_parts(browser, handler, true))
    }

    fn from_parts(browser: Browser, mut handler: Handler, remote: bool) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser connection error: {}", e);
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            debug!("Browser handler loop ended");
        });

        Self {
            browser,
            alive,
            handler,
            remote,
        }
    }

    /// Whether the CDP connection is still being serviced.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.handler.is_finished()
    }

    /// Lightweight probe: connection alive and the browser answers a version query.
    pub async fn is_valid(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.browser.version()).await,
            Ok(Ok(_))
        )
    }

    /// Create an isolated browsing context with one blank page, prepared with
    /// the user agent, headers, viewport and stealth scripts.
    pub async fn new_context(
        self: &Arc<Self>,
        config: &BrowserEngineConfig,
        user_agent: &str,
    ) -> Result<BrowsingContext, BrowserError> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| BrowserError::Context(e.to_string()))?;
        let context_id = created.result.browser_context_id.clone();

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::Context)?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                self.dispose_context(context_id).await;
                return Err(BrowserError::Context(e.to_string()));
            }
        };

        let context = BrowsingContext::new(page, context_id, self.clone());
        if let Err(e) = context.prepare(config, user_agent).await {
            context.close().await;
            return Err(e);
        }
        Ok(context)
    }

    pub(crate) async fn dispose_context(
        &self,
        context_id: chromiumoxide::cdp::browser_protocol::browser::BrowserContextId,
    ) {
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            debug!("Failed to dispose browser context: {}", e);
        }
    }

    /// Ask a launched browser to exit. Remote browsers are left running.
    pub async fn shutdown(&self) {
        if !self.remote && self.is_alive() {
            if let Err(e) = self.browser.execute(CloseParams::default()).await {
                debug!("Browser close failed: {}", e);
            }
        }
        self.handler.abort();
    }
}

#[async_trait]
impl SessionHealth for BrowserSession {
    fn is_alive(&self) -> bool {
        BrowserSession::is_alive(self)
    }

    async fn is_valid(&self) -> bool {
        BrowserSession::is_valid(self).await
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
