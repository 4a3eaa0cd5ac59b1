//! Scripts injected into every new document before page scripts run.
//!
//! Player hosts probe a handful of automation tells and, failing those,
//! hijack navigation with popups. Each entry patches one of them.

pub const STEALTH_SCRIPTS: &[&str] = &[
    r#"
    (() => {
        const proto = Object.getPrototypeOf(navigator);
        if ('webdriver' in proto) {
            delete proto.webdriver;
        }
        Object.defineProperty(proto, 'webdriver', { get: () => false, configurable: true });
    })();
    "#,
    r#"
    window.chrome = Object.assign({ runtime: {}, app: { isInstalled: false } }, window.chrome || {});
    "#,
    r#"
    (() => {
        const langs = Object.freeze(['en-US', 'en', 'ja']);
        const plugins = ['PDF Viewer', 'Chrome PDF Viewer', 'Chromium PDF Viewer']
            .map((name) => ({ name, filename: 'internal-pdf-viewer', length: 1 }));
        const define = (key, value) =>
            Object.defineProperty(navigator, key, { get: () => value, configurable: true });
        define('languages', langs);
        define('plugins', plugins);
        define('hardwareConcurrency', 8);
    })();
    "#,
    r#"
    if (navigator.permissions && navigator.permissions.query) {
        const query = navigator.permissions.query.bind(navigator.permissions);
        navigator.permissions.query = (desc) =>
            desc && desc.name === 'notifications'
                ? Promise.resolve({ state: 'prompt', onchange: null })
                : query(desc);
    }
    "#,
    r#"
    if (!window.outerWidth || !window.outerHeight) {
        Object.defineProperty(window, 'outerWidth', { get: () => window.innerWidth });
        Object.defineProperty(window, 'outerHeight', { get: () => window.innerHeight + 80 });
    }
    "#,
    // Popunders on player pages steal navigation mid-render
    r#"
    window.open = () => null;
    window.alert = () => undefined;
    "#,
];

#[cfg(test)]
mod tests {
    use super::STEALTH_SCRIPTS;

    #[test]
    fn popups_are_neutralised() {
        assert!(STEALTH_SCRIPTS.iter().any(|s| s.contains("window.open = () => null")));
    }
}
