//! User-agent classification for choosing a redirect strategy.

use regex::Regex;
use woothee::parser::Parser;

use crate::config::EngineConfig;

/// Crawlers known to unfurl links in chat and social apps. Anything else is
/// treated as a person, so a misdetected app browser never gets a bot answer.
const BOT_SUBSTRINGS: &[&str] = &["Slackbot", "facebookexternalhit", "Facebot", "Twitterbot"];
const BOT_EXACT: &[&str] = &["Vercel Edge Functions"];

const MOBILE_CATEGORIES: &[&str] = &["smartphone", "mobilephone"];
const IOS_OS_NAMES: &[&str] = &["iPhone", "iPad", "iPod", "iOS"];

/// What the redirect decision needs to know about the requesting device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    pub is_mobile: bool,
    pub is_ios: bool,
    /// In-app browser of a chat/social app.
    pub is_webview: bool,
    /// Navigating to a custom URI scheme shows no OS warning dialog.
    pub is_safe_browser: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceClassifier {
    app_webview: Option<Regex>,
    ios_safe_browser: Option<Regex>,
}

impl DeviceClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            app_webview: config.app_webview_pattern().cloned(),
            ios_safe_browser: config.ios_safe_browser_pattern().cloned(),
        }
    }

    pub fn classify(&self, user_agent: &str) -> DeviceProfile {
        let parsed = Parser::new().parse(user_agent).unwrap_or_default();
        let is_mobile = MOBILE_CATEGORIES.contains(&parsed.category);
        let is_ios = IOS_OS_NAMES.contains(&parsed.os);
        let is_android = parsed.os == "Android";

        let is_webview = self
            .app_webview
            .as_ref()
            .is_some_and(|re| re.is_match(user_agent));
        let is_safe_browser = is_mobile
            && (is_android
                || self
                    .ios_safe_browser
                    .as_ref()
                    .is_some_and(|re| re.is_match(user_agent)));

        DeviceProfile {
            is_mobile,
            is_ios,
            is_webview,
            is_safe_browser,
        }
    }

    pub fn is_bot(&self, user_agent: &str) -> bool {
        is_bot(user_agent)
    }
}

/// Match against the fixed crawler list.
pub fn is_bot(user_agent: &str) -> bool {
    BOT_SUBSTRINGS.iter().any(|s| user_agent.contains(s)) || BOT_EXACT.contains(&user_agent)
}
