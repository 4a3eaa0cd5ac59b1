//! Anti-embedding heuristics over a stream page's HTML and headers.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use super::types::ProtectionResult;
use crate::extractor::host_matches;
use crate::fetch::{FetchedPage, PageFetcher};

/// Providers whose players are known to embed cleanly.
pub const EMBEDDABLE_HOSTS: &[&str] = &[
    "youtube.com",
    "youtube-nocookie.com",
    "vimeo.com",
    "dailymotion.com",
    "ok.ru",
    "mp4upload.com",
    "streamtape.com",
    "dood.watch",
    "doodstream.com",
    "vidmoly.to",
    "uqload.com",
];

static SIGNATURES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("top window redirect", r"window\.top\.location"),
        ("top location assignment", r"\btop\.location(?:\.href)?\s*=[^=]"),
        ("parent redirect", r"\bparent\.location(?:\.href)?\s*="),
        ("frame-busting comparison", r"\b(?:window\.)?top\s*!==?\s*(?:window\.)?self\b|\bself\s*!==?\s*(?:window\.)?top\b"),
        ("frameElement check", r"window\.frameElement"),
        ("challenge page", r"(?i)cf-browser-verification|challenge-platform|cf_chl_opt"),
        ("challenge interstitial", r"(?i)<title>\s*just a moment"),
        ("captcha", r#"(?i)class=["'][^"']*(?:g-recaptcha|h-captcha|cf-turnstile)"#),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid protection signature")))
    .collect()
});

/// Signature names found in `html`.
pub fn body_signals(html: &str) -> Vec<String> {
    SIGNATURES
        .iter()
        .filter(|(_, pattern)| pattern.is_match(html))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Framing restrictions declared in response headers.
pub fn header_signals(page: &FetchedPage) -> Vec<String> {
    let mut reasons = Vec::new();

    if let Some(xfo) = page.header("x-frame-options") {
        let value = xfo.trim().to_ascii_uppercase();
        if value == "DENY" || value == "SAMEORIGIN" {
            reasons.push(format!("X-Frame-Options: {}", value));
        }
    }

    if let Some(csp) = page.header("content-security-policy") {
        let ancestors = csp
            .split(';')
            .map(str::trim)
            .find(|d| d.to_ascii_lowercase().starts_with("frame-ancestors"));
        if let Some(directive) = ancestors {
            let open = directive.split_whitespace().skip(1).any(|source| source == "*");
            if !open {
                reasons.push(format!("CSP {}", directive));
            }
        }
    }

    reasons
}

pub struct ProtectionChecker {
    fetcher: Arc<dyn PageFetcher>,
    exempt_hosts: Vec<String>,
}

impl ProtectionChecker {
    /// `extra_exempt` is appended to [`EMBEDDABLE_HOSTS`].
    pub fn new(fetcher: Arc<dyn PageFetcher>, extra_exempt: &[String]) -> Self {
        let mut exempt_hosts: Vec<String> = EMBEDDABLE_HOSTS.iter().map(|h| h.to_string()).collect();
        exempt_hosts.extend(extra_exempt.iter().cloned());
        Self {
            fetcher,
            exempt_hosts,
        }
    }

    pub fn is_exempt(&self, url: &str) -> bool {
        host_matches(url, &self.exempt_hosts)
    }

    /// Check a stream URL. Unreachable pages count as protected.
    pub async fn check(&self, stream_url: &str, referer: &str, timeout: Duration) -> ProtectionResult {
        if self.is_exempt(stream_url) {
            debug!("Protection check skipped for embeddable host: {}", stream_url);
            return ProtectionResult {
                protected: false,
                reasons: Vec::new(),
                exempt: true,
            };
        }

        let fetched = tokio::time::timeout(
            timeout,
            self.fetcher.fetch_with_referer(stream_url, referer),
        )
        .await;
        let page = match fetched {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return self.fail_closed(stream_url, e.to_string()),
            Err(_) => return self.fail_closed(stream_url, format!("timed out after {:?}", timeout)),
        };
        if !page.is_success() {
            return self.fail_closed(stream_url, format!("HTTP {}", page.status));
        }

        let mut reasons = body_signals(&page.body);
        reasons.extend(header_signals(&page));
        let protected = !reasons.is_empty();
        if protected {
            info!("Protection detected on {}: {}", stream_url, reasons.join(", "));
        } else {
            debug!("No protection signals on {}", stream_url);
        }

        ProtectionResult {
            protected,
            reasons,
            exempt: false,
        }
    }

    fn fail_closed(&self, url: &str, reason: String) -> ProtectionResult {
        info!("Protection check could not load {}: {}", url, reason);
        ProtectionResult {
            protected: true,
            reasons: vec![format!("unreachable: {}", reason)],
            exempt: false,
        }
    }
}
