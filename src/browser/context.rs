//! Per-request browser context.

use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use tracing::debug;

use super::config::BrowserEngineType;
use super::session::BrowserSession;
use super::stealth::STEALTH_SCRIPTS;
use super::{BrowserEngineConfig, BrowserError};

/// An isolated context (own cookies and storage) holding one page.
///
/// Call [`close`](Self::close) when done. Dropping without closing schedules
/// the cleanup on the runtime instead.
pub struct BrowsingContext {
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    session: Arc<BrowserSession>,
}

impl BrowsingContext {
    pub(crate) fn new(page: Page, context_id: BrowserContextId, session: Arc<BrowserSession>) -> Self {
        Self {
            page: Some(page),
            context_id: Some(context_id),
            session,
        }
    }

    pub(crate) fn page(&self) -> Result<&Page, BrowserError> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Context("context already closed".into()))
    }

    /// Spoof identity and register stealth scripts before any navigation.
    pub(crate) async fn prepare(
        &self,
        config: &BrowserEngineConfig,
        user_agent: &str,
    ) -> Result<(), BrowserError> {
        let page = self.page()?;
        let context_err = |e: chromiumoxide::error::CdpError| BrowserError::Context(e.to_string());

        page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map_err(context_err)?;

        let headers = serde_json::json!({
            "Accept-Language": "en-US,en;q=0.9",
            "Upgrade-Insecure-Requests": "1",
        });
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await
            .map_err(context_err)?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            config.window_width as i64,
            config.window_height as i64,
            1.0,
            false,
        ))
        .await
        .map_err(context_err)?;

        if config.engine == BrowserEngineType::Stealth {
            for script in STEALTH_SCRIPTS {
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                    script.to_string(),
                ))
                .await
                .map_err(context_err)?;
            }
        }

        Ok(())
    }

    /// Close the page and dispose the context.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Page close failed: {}", e);
            }
        }
        if let Some(context_id) = self.context_id.take() {
            self.session.dispose_context(context_id).await;
        }
    }
}

impl Drop for BrowsingContext {
    fn drop(&mut self) {
        let page = self.page.take();
        let context_id = self.context_id.take();
        if page.is_none() && context_id.is_none() {
            return;
        }

        let session = self.session.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(page) = page {
                    let _ = page.close().await;
                }
                if let Some(context_id) = context_id {
                    session.dispose_context(context_id).await;
                }
            });
        }
    }
}
