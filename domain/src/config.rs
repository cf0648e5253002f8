//! Engine configuration.
//!
//! The host application loads these settings once (usually from the process
//! environment) and hands them to the engine. Patterns are compiled at
//! construction so a bad regex fails start-up, not a request.

use regex::Regex;

use crate::CoreError;

/// Default length of derived and accepted keys.
pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Longest key a SHA-512 digest can yield in unpadded base64url.
pub const MAX_KEY_LENGTH: usize = 86;

/// Immutable engine settings shared by the classifier, decision engine and
/// service.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    fallback_url: String,
    app_webview_pattern: Option<Regex>,
    ios_safe_browser_pattern: Option<Regex>,
    app_open_scheme: Option<String>,
    key_length: usize,
}

impl EngineConfig {
    /// Configuration with only the required fallback URL set.
    pub fn new<S: Into<String>>(fallback_url: S) -> Result<Self, CoreError> {
        let fallback_url = fallback_url.into();
        if !(fallback_url.starts_with("http://") || fallback_url.starts_with("https://")) {
            return Err(CoreError::InvalidConfig(
                "fallback url must start with http:// or https://".into(),
            ));
        }
        Ok(Self {
            fallback_url,
            app_webview_pattern: None,
            ios_safe_browser_pattern: None,
            app_open_scheme: None,
            key_length: DEFAULT_KEY_LENGTH,
        })
    }

    /// User agents matching `pattern` are treated as in-app webviews.
    pub fn with_app_webview_pattern(mut self, pattern: &str) -> Result<Self, CoreError> {
        self.app_webview_pattern = Some(compile("app webview pattern", pattern)?);
        Ok(self)
    }

    /// iOS user agents matching `pattern` open custom URI schemes without a
    /// system warning dialog.
    pub fn with_ios_safe_browser_pattern(mut self, pattern: &str) -> Result<Self, CoreError> {
        self.ios_safe_browser_pattern = Some(compile("ios safe browser pattern", pattern)?);
        Ok(self)
    }

    /// Scheme prefix used to build the generic "open this page in app" link,
    /// e.g. `myapp://web?url=`.
    pub fn with_app_open_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        let scheme = scheme.into();
        self.app_open_scheme = if scheme.is_empty() { None } else { Some(scheme) };
        self
    }

    pub fn with_key_length(mut self, key_length: usize) -> Result<Self, CoreError> {
        if !(1..=MAX_KEY_LENGTH).contains(&key_length) {
            return Err(CoreError::InvalidConfig(format!(
                "key length must be between 1 and {MAX_KEY_LENGTH}"
            )));
        }
        self.key_length = key_length;
        Ok(self)
    }

    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }

    pub fn app_webview_pattern(&self) -> Option<&Regex> {
        self.app_webview_pattern.as_ref()
    }

    pub fn ios_safe_browser_pattern(&self) -> Option<&Regex> {
        self.ios_safe_browser_pattern.as_ref()
    }

    pub fn app_open_scheme(&self) -> Option<&str> {
        self.app_open_scheme.as_deref()
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }
}

fn compile(what: &str, pattern: &str) -> Result<Regex, CoreError> {
    Regex::new(pattern).map_err(|e| CoreError::InvalidConfig(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::new("https://fallback.example").unwrap();
        assert_eq!(cfg.fallback_url(), "https://fallback.example");
        assert_eq!(cfg.key_length(), DEFAULT_KEY_LENGTH);
        assert!(cfg.app_webview_pattern().is_none());
        assert!(cfg.ios_safe_browser_pattern().is_none());
        assert!(cfg.app_open_scheme().is_none());
    }

    #[test]
    fn rejects_bad_fallback_and_patterns() {
        assert!(matches!(
            EngineConfig::new("ftp://x"),
            Err(CoreError::InvalidConfig(_))
        ));
        let cfg = EngineConfig::new("https://f").unwrap();
        assert!(cfg.clone().with_app_webview_pattern("(unclosed").is_err());
        assert!(cfg.clone().with_key_length(0).is_err());
        assert!(cfg.clone().with_key_length(MAX_KEY_LENGTH + 1).is_err());
        assert_eq!(cfg.with_key_length(10).unwrap().key_length(), 10);
    }

    #[test]
    fn empty_scheme_means_unset() {
        let cfg = EngineConfig::new("https://f").unwrap().with_app_open_scheme("");
        assert!(cfg.app_open_scheme().is_none());
        let cfg = cfg.with_app_open_scheme("myapp://web?url=");
        assert_eq!(cfg.app_open_scheme(), Some("myapp://web?url="));
    }
}
