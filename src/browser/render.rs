//! Navigation and DOM capture inside a prepared context.

use std::time::Duration;

use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::context::BrowsingContext;
use super::{BrowserEngineConfig, BrowserError, RenderedPage};

/// Resolves once the document is at least interactive, or after 10s.
const READY_STATE_SCRIPT: &str = r#"
    new Promise((done) => {
        if (document.readyState !== 'loading') return done(document.readyState);
        const timer = setTimeout(() => done('loading'), 10000);
        document.addEventListener('readystatechange', () => {
            clearTimeout(timer);
            done(document.readyState);
        }, { once: true });
    })
"#;

/// Collects iframe and media sources, descending into same-origin frames.
const FRAME_SOURCES_SCRIPT: &str = r#"
    (() => {
        const out = [];
        const push = (v) => {
            if (typeof v === 'string' && v && !v.startsWith('about:') && !out.includes(v)) out.push(v);
        };
        const walk = (doc, depth) => {
            doc.querySelectorAll('iframe, frame').forEach((f) => {
                push(f.src);
                push(f.getAttribute('data-src'));
                if (depth < 3) {
                    try { if (f.contentDocument) walk(f.contentDocument, depth + 1); } catch (e) {}
                }
            });
            doc.querySelectorAll('video, video source, audio source').forEach((v) => {
                push(v.currentSrc);
                push(v.src);
            });
        };
        walk(document, 0);
        return out;
    })()
"#;

/// Navigate, wait for the player to settle and capture the DOM.
pub(crate) async fn render_page(
    context: &BrowsingContext,
    config: &BrowserEngineConfig,
    url: &str,
    timeout: Duration,
) -> Result<RenderedPage, BrowserError> {
    let page = context.page()?;

    navigate(page, url, timeout).await?;

    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    if let Some(selector) = config.wait_for_selector.as_deref() {
        await_selector(page, selector, timeout).await;
    }

    let final_url = page
        .url()
        .await
        .map_err(|e| BrowserError::SessionLost(e.to_string()))?
        .unwrap_or_else(|| url.to_string());

    let html = tokio::time::timeout(timeout, page.content())
        .await
        .map_err(|_| BrowserError::Timeout {
            after: timeout,
            what: format!("reading DOM of {}", url),
        })?
        .map_err(|e| BrowserError::Evaluation(e.to_string()))?;

    let frame_sources = collect_frame_sources(page, timeout).await;

    Ok(RenderedPage {
        url: url.to_string(),
        final_url,
        html,
        frame_sources,
    })
}

/// Navigate with a short timeout, falling back to a looser ready-state wait.
///
/// Player pages often keep loading ads forever, so a navigation timeout alone
/// is not a failure as long as the document becomes interactive.
async fn navigate(page: &Page, url: &str, timeout: Duration) -> Result<(), BrowserError> {
    info!("Navigating to {}", url);
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(_)) => return Ok(()),
        Ok(Err(e)) => {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => debug!("Navigation to {} did not finish in {:?}, waiting for ready state", url, timeout),
    }

    let fallback = timeout * 2;
    match tokio::time::timeout(fallback, page.evaluate(READY_STATE_SCRIPT.to_string())).await {
        Ok(Ok(result)) => {
            let state: String = result
                .into_value()
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("Page ready state: {}", state);
            Ok(())
        }
        Ok(Err(e)) => Err(BrowserError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(BrowserError::Timeout {
            after: timeout + fallback,
            what: format!("navigation to {}", url),
        }),
    }
}

/// Best effort: a player that never shows the selector is still scanned.
async fn await_selector(page: &Page, selector: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, page.find_element(selector)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("{} never appeared: {}", selector, e),
        Err(_) => warn!("Gave up waiting {:?} for {}", timeout, selector),
    }
}

async fn collect_frame_sources(page: &Page, timeout: Duration) -> Vec<String> {
    match tokio::time::timeout(timeout, page.evaluate(FRAME_SOURCES_SCRIPT.to_string())).await {
        Ok(Ok(result)) => result.into_value().unwrap_or_default(),
        Ok(Err(e)) => {
            debug!("Frame source collection failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            debug!("Frame source collection timed out");
            Vec::new()
        }
    }
}
