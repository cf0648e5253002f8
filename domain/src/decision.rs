//! Redirect decision table.
//!
//! [`decide`] is a pure function of the (already substituted) link, the
//! device profile and the bot flag. Rendering the resulting [`RedirectPlan`]
//! is up to the host application.

use percent_encoding::utf8_percent_encode;

use crate::config::EngineConfig;
use crate::device::DeviceProfile;
use crate::template::URI_COMPONENT;
use crate::{AppCall, BridgeType};

/// The three targets of a link after template substitution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub web_url: String,
    pub ios_url: Option<String>,
    pub aos_url: Option<String>,
}

/// A stored link with its targets substituted for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLink {
    pub targets: ResolvedTargets,
    pub bridge_type: BridgeType,
    pub app_call: AppCall,
    pub bridge_template: Option<String>,
}

/// What to do with a resolution request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectPlan {
    /// Plain HTTP redirect.
    Immediate { location: String },
    /// Page that attempts the app link and/or falls back to the web link.
    Interstitial {
        app_link: Option<String>,
        web_link: String,
        /// Never fall back to `web_link` automatically.
        app_only: bool,
        /// Try `app_link` on load instead of waiting for a tap.
        auto_call_app: bool,
        bridge_template: Option<String>,
    },
    /// Unknown or expired key, shown to a person with a way out.
    NotFound { fallback_url: String },
}

/// Pick the redirect strategy for one request.
///
/// `request_url` is the absolute URL of the current request; it feeds the
/// generic open-in-app link when the link has no platform target.
pub fn decide(
    link: Option<&ResolvedLink>,
    device: &DeviceProfile,
    is_bot: bool,
    request_url: &str,
    config: &EngineConfig,
) -> RedirectPlan {
    let Some(link) = link else {
        let fallback_url = config.fallback_url().to_string();
        // Crawlers get a stable page instead of an error.
        return if is_bot {
            RedirectPlan::Immediate {
                location: fallback_url,
            }
        } else {
            RedirectPlan::NotFound { fallback_url }
        };
    };
    let targets = &link.targets;

    if !device.is_mobile && (is_bot || link.bridge_type == BridgeType::Normal) {
        return RedirectPlan::Immediate {
            location: targets.web_url.clone(),
        };
    }

    let platform_link = platform_link(targets, device);

    // In-app browsers cannot reliably hand off to an app scheme.
    if device.is_mobile && device.is_webview {
        return RedirectPlan::Immediate {
            location: platform_link.unwrap_or(&targets.web_url).to_string(),
        };
    }

    let app_link = platform_link
        .map(str::to_string)
        .or_else(|| app_open_link(config, request_url));
    let auto_call_app = match link.app_call {
        AppCall::Always => true,
        AppCall::SafeOnly => device.is_safe_browser,
        AppCall::None => false,
    };
    let app_only = link.bridge_type == BridgeType::AppOnly && app_link.is_some();

    RedirectPlan::Interstitial {
        app_link,
        web_link: targets.web_url.clone(),
        app_only,
        auto_call_app,
        bridge_template: link.bridge_template.clone(),
    }
}

fn platform_link<'a>(targets: &'a ResolvedTargets, device: &DeviceProfile) -> Option<&'a str> {
    if !device.is_mobile {
        return None;
    }
    if device.is_ios {
        targets.ios_url.as_deref()
    } else {
        targets.aos_url.as_deref()
    }
}

/// Generic deep link that asks the app to open `url` in its own browser.
pub fn app_open_link(config: &EngineConfig, url: &str) -> Option<String> {
    let scheme = config.app_open_scheme()?;
    if url.is_empty() {
        return None;
    }
    Some(format!("{scheme}{}", utf8_percent_encode(url, URI_COMPONENT)))
}
