//! User agents shared by the HTTP client and browser contexts.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Sent when no user agent is configured.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Desktop browsers rotated through in impersonate mode. Streaming sites
/// often serve a different player to mobile agents, so none are listed.
pub const IMPERSONATE_USER_AGENTS: &[&str] = &[
    USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:140.0) Gecko/20100101 Firefox/140.0",
];

static NEXT_AGENT: AtomicUsize = AtomicUsize::new(0);

/// Next agent in the rotation.
pub fn random_user_agent() -> &'static str {
    let i = NEXT_AGENT.fetch_add(1, Ordering::Relaxed);
    IMPERSONATE_USER_AGENTS[i % IMPERSONATE_USER_AGENTS.len()]
}

/// Map the `user_agent` setting to the header value.
///
/// Unset or empty gives [`USER_AGENT`]; `impersonate` (or `random`) rotates
/// through [`IMPERSONATE_USER_AGENTS`]; anything else is sent verbatim.
pub fn resolve_user_agent(setting: Option<&str>) -> String {
    match setting.map(str::trim) {
        None | Some("") => USER_AGENT.to_string(),
        Some("impersonate" | "random") => random_user_agent().to_string(),
        Some(literal) => literal.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_means_default_agent() {
        assert_eq!(resolve_user_agent(None), USER_AGENT);
        assert_eq!(resolve_user_agent(Some("  ")), USER_AGENT);
    }

    #[test]
    fn rotation_stays_within_list() {
        for _ in 0..IMPERSONATE_USER_AGENTS.len() + 2 {
            let agent = resolve_user_agent(Some("impersonate"));
            assert!(IMPERSONATE_USER_AGENTS.contains(&agent.as_str()));
        }
        assert!(IMPERSONATE_USER_AGENTS.contains(&resolve_user_agent(Some("random")).as_str()));
    }

    #[test]
    fn literal_agent_is_kept() {
        assert_eq!(resolve_user_agent(Some("EpisodeBot/0.4")), "EpisodeBot/0.4");
    }
}
