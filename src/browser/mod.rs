//! Headless browser session management for the dynamic extraction stage.
//!
//! One browser process is shared by every request. It is launched lazily,
//! probed before each use and relaunched when the probe fails. Each render
//! runs in its own browser context (separate cookies, viewport, user agent)
//! which is disposed on every exit path.

mod config;
#[cfg(feature = "browser")]
mod context;
#[cfg(feature = "browser")]
mod render;
#[cfg(feature = "browser")]
mod session;
#[cfg(feature = "browser")]
mod slot;
#[cfg(feature = "browser")]
mod stealth;

pub use config::{BrowserEngineConfig, BrowserEngineType};
#[cfg(feature = "browser")]
pub use context::BrowsingContext;
#[cfg(feature = "browser")]
pub use session::BrowserSession;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use slot::SessionSlot;
#[cfg(feature = "browser")]
use tracing::debug;

use crate::fetch::resolve_user_agent;

/// Errors from the browser layer.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser context failed: {0}")]
    Context(String),
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },
    #[error("timed out after {}s: {what}", .after.as_secs_f32())]
    Timeout { after: Duration, what: String },
    #[error("page evaluation failed: {0}")]
    Evaluation(String),
    #[error("browser session lost: {0}")]
    SessionLost(String),
    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    NotCompiled,
}

impl BrowserError {
    /// Whether the shared session should be thrown away after this error.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            BrowserError::Context(_) | BrowserError::SessionLost(_)
        )
    }
}

/// A rendered page plus every frame/media source found in its live DOM.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub html: String,
    /// `src` of iframes, videos and sources, including same-origin nested frames.
    pub frame_sources: Vec<String>,
}

/// Renders a page with JavaScript.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, BrowserError>;
}

/// Owner of the shared browser session.
#[cfg(feature = "browser")]
pub struct BrowserSessionManager {
    config: BrowserEngineConfig,
    user_agent: String,
    slot: SessionSlot<BrowserSession>,
}

#[cfg(feature = "browser")]
impl BrowserSessionManager {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            user_agent: resolve_user_agent(None),
            slot: SessionSlot::new(),
        }
    }

    /// Override the user agent every context reports.
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = resolve_user_agent(user_agent);
        self
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Get a live session, launching or relaunching as needed.
    ///
    /// Launch failure is returned to this caller only; the next call starts
    /// over. A session is published only after it is fully connected.
    pub async fn acquire(&self) -> Result<Arc<BrowserSession>, BrowserError> {
        self.slot
            .acquire(|| BrowserSession::launch(&self.config))
            .await
    }

    /// Drop the current session so the next `acquire` relaunches.
    pub fn invalidate(&self) {
        self.slot.invalidate();
    }

    /// Shut down the browser if one is running.
    pub async fn close(&self) {
        if let Some(session) = self.slot.take() {
            session.shutdown().await;
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageRenderer for BrowserSessionManager {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, BrowserError> {
        let session = self.acquire().await?;

        let context = match session
            .new_context(&self.config, &self.user_agent)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };

        // Use inner function to ensure the context is always closed
        let result = render::render_page(&context, &self.config, url, timeout).await;
        context.close().await;

        match result {
            Ok(page) => {
                debug!(
                    "Rendered {} ({} bytes, {} frame sources)",
                    page.final_url,
                    page.html.len(),
                    page.frame_sources.len()
                );
                Ok(page)
            }
            Err(e) => {
                if e.poisons_session() {
                    self.invalidate();
                }
                Err(e)
            }
        }
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserSessionManager {
    config: BrowserEngineConfig,
    user_agent: String,
}

#[cfg(not(feature = "browser"))]
impl BrowserSessionManager {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            user_agent: resolve_user_agent(None),
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = resolve_user_agent(user_agent);
        self
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn invalidate(&self) {}

    pub async fn close(&self) {}
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl PageRenderer for BrowserSessionManager {
    async fn render(&self, _url: &str, _timeout: Duration) -> Result<RenderedPage, BrowserError> {
        Err(BrowserError::NotCompiled)
    }
}
