//! Registration-time validation of link content. Never runs on the resolve
//! path.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use percent_encoding::{percent_decode_str, utf8_percent_encode};

use crate::template::{parse_params, strip_markers, URI_COMPONENT};
use crate::{BridgeType, CoreError, LinkContent, LinkKey};

const MAX_URL_LEN: usize = 2048;

/// Latest accepted expiry: 9999-12-31T23:59:59.999Z. Keeps every store's
/// millisecond timestamp and TTL arithmetic in range.
pub const MAX_EXPIRE_MILLIS: u64 = 253_402_300_799_999;

/// Validate the web target: http/https scheme and a reasonable length.
pub fn validate_web_url(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || !(trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        || trimmed.len() > MAX_URL_LEN
    {
        return Err(CoreError::InvalidInput("webUrl required/format".into()));
    }
    Ok(())
}

/// Validate a caller-supplied key: key charset and the configured length.
pub fn validate_custom_key(s: &str, key_length: usize) -> Result<LinkKey, CoreError> {
    let key = LinkKey::new(s)?;
    if key.as_str().len() != key_length {
        return Err(CoreError::InvalidKey(format!(
            "must be exactly {key_length} characters"
        )));
    }
    Ok(key)
}

/// Expiry must come strictly after registration and no later than
/// [`MAX_EXPIRE_MILLIS`].
pub fn validate_dates(register_date: SystemTime, expire_date: SystemTime) -> Result<(), CoreError> {
    if expire_date <= register_date {
        return Err(CoreError::InvalidInput(
            "expireDate must be after registerDate".into(),
        ));
    }
    if expire_date > UNIX_EPOCH + Duration::from_millis(MAX_EXPIRE_MILLIS) {
        return Err(CoreError::InvalidInput("expireDate out of range".into()));
    }
    Ok(())
}

/// Check cross-field template invariants and return the normalized content.
///
/// Normalization turns empty app templates into `None` and drops
/// `bridge_template` unless the link is `app_only`.
pub fn validate_content(content: LinkContent) -> Result<LinkContent, CoreError> {
    let LinkContent {
        web_url,
        ios_url,
        aos_url,
        bridge_type,
        bridge_template,
        app_call,
    } = content;
    let ios_url = ios_url.filter(|s| !s.is_empty());
    let aos_url = aos_url.filter(|s| !s.is_empty());
    let bridge_template = match bridge_type {
        BridgeType::AppOnly => bridge_template.filter(|s| !s.is_empty()),
        _ => None,
    };

    validate_web_url(&web_url)?;

    let templates = [Some(&web_url), ios_url.as_ref(), aos_url.as_ref()];
    for t in templates.iter().flatten() {
        check_query_encoding(t)?;
    }

    let mut positional = BTreeSet::new();
    for t in templates.iter().flatten() {
        positional.extend(parse_params(t).positional);
    }
    if !positional.iter().enumerate().all(|(i, n)| *n == i + 1) {
        return Err(CoreError::InvalidInput(
            "non-sequential path variables".into(),
        ));
    }

    let web_named: BTreeSet<String> = parse_params(&web_url).named.into_iter().collect();
    for t in [ios_url.as_ref(), aos_url.as_ref()].into_iter().flatten() {
        if parse_params(t).named.iter().any(|n| !web_named.contains(n)) {
            return Err(CoreError::InvalidInput(
                "unknown variable in app link".into(),
            ));
        }
    }

    Ok(LinkContent {
        web_url,
        ios_url,
        aos_url,
        bridge_type,
        bridge_template,
        app_call,
    })
}

/// Every query value must already be percent-encoded: decoding and
/// re-encoding it (placeholder markers stripped) gives the same text.
fn check_query_encoding(template: &str) -> Result<(), CoreError> {
    let Some((_, query)) = template.split_once('?') else {
        return Ok(());
    };
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    for pair in query.split('&') {
        let value = pair.split_once('=').map_or("", |(_, v)| v);
        let sanitized = strip_markers(value);
        let decoded = percent_decode_str(&sanitized)
            .decode_utf8()
            .map_err(|_| encoding_required())?;
        let reencoded = utf8_percent_encode(&decoded, URI_COMPONENT).to_string();
        if !reencoded.eq_ignore_ascii_case(&sanitized) {
            return Err(encoding_required());
        }
    }
    Ok(())
}

fn encoding_required() -> CoreError {
    CoreError::InvalidInput("encoding required".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppCall;

    fn content(web: &str, ios: Option<&str>, aos: Option<&str>) -> LinkContent {
        LinkContent {
            web_url: web.into(),
            ios_url: ios.map(str::to_string),
            aos_url: aos.map(str::to_string),
            bridge_type: BridgeType::Normal,
            bridge_template: None,
            app_call: AppCall::Always,
        }
    }

    fn invalid(msg: &str) -> CoreError {
        CoreError::InvalidInput(msg.into())
    }

    #[test]
    fn web_url_validation_basic() {
        assert!(validate_web_url("https://example.com").is_ok());
        assert!(validate_web_url("http://example.com").is_ok());
        assert!(validate_web_url("").is_err());
        assert!(validate_web_url("ftp://example.com").is_err());
        assert!(validate_web_url(&format!("https://x/{}", "a".repeat(MAX_URL_LEN))).is_err());
    }

    #[test]
    fn custom_key_needs_exact_length() {
        assert!(validate_custom_key("abcd-_12", 8).is_ok());
        assert!(matches!(validate_custom_key("short", 8), Err(CoreError::InvalidKey(_))));
        assert!(matches!(validate_custom_key("bad/key!", 8), Err(CoreError::InvalidKey(_))));
    }

    #[test]
    fn dates_must_be_ordered() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(validate_dates(t, t + Duration::from_millis(1)).is_ok());
        assert!(validate_dates(t, t).is_err());
        assert!(validate_dates(t, t - Duration::from_secs(1)).is_err());

        let max = UNIX_EPOCH + Duration::from_millis(MAX_EXPIRE_MILLIS);
        assert!(validate_dates(t, max).is_ok());
        assert_eq!(
            validate_dates(t, max + Duration::from_millis(1)),
            Err(invalid("expireDate out of range"))
        );
        let wraps_i64 = UNIX_EPOCH + Duration::from_millis(i64::MAX as u64 + 10);
        assert!(validate_dates(t, wraps_i64).is_err());
    }

    #[test]
    fn rejects_gap_in_positional_params() {
        let err = validate_content(content("https://x?a=$2", None, None)).unwrap_err();
        assert_eq!(err, invalid("non-sequential path variables"));
    }

    #[test]
    fn positional_params_are_pooled_across_templates() {
        let ok = validate_content(content("https://x/$1", Some("myapp://open/$2"), None));
        assert!(ok.is_ok());
        let err = validate_content(content("https://x/$1", Some("myapp://open/$3"), None));
        assert_eq!(err.unwrap_err(), invalid("non-sequential path variables"));
    }

    #[test]
    fn app_links_may_only_use_web_named_params() {
        let err = validate_content(content(
            "https://x?id=$id",
            Some("myapp://open?id=$id&extra=$other"),
            None,
        ))
        .unwrap_err();
        assert_eq!(err, invalid("unknown variable in app link"));

        let ok = validate_content(content(
            "https://x?id=$id&other=$other",
            Some("myapp://open?id=$id"),
            Some("intent://open?extra=$other"),
        ));
        assert!(ok.is_ok());
    }

    #[test]
    fn query_values_must_be_encoded() {
        let err = validate_content(content("https://x?a=hello world", None, None)).unwrap_err();
        assert_eq!(err, invalid("encoding required"));
        assert!(validate_content(content("https://x?a=hello%20world", None, None)).is_ok());
        assert!(validate_content(content("https://x?a=%2f&b", None, None)).is_ok());
        assert!(validate_content(content("https://x?next=https://y", None, None)).is_err());
        assert!(
            validate_content(content("https://x", Some("myapp://open?url=https://y"), None))
                .is_err()
        );
        assert!(validate_content(content(
            "https://x",
            Some("myapp://open?url=https%3A%2F%2Fy"),
            None
        ))
        .is_ok());
    }

    #[test]
    fn placeholder_markers_do_not_trip_encoding_check() {
        assert!(validate_content(content("https://x?id=$id#top", None, None)).is_ok());
    }

    #[test]
    fn normalizes_empty_templates_and_bridge_template() {
        let mut c = content("https://x", Some(""), Some(""));
        c.bridge_template = Some("<p>stale</p>".into());
        let out = validate_content(c).unwrap();
        assert_eq!(out.ios_url, None);
        assert_eq!(out.aos_url, None);
        assert_eq!(out.bridge_template, None);

        let mut c = content("https://x", None, None);
        c.bridge_type = BridgeType::AppOnly;
        c.bridge_template = Some("<p>install</p>".into());
        let out = validate_content(c).unwrap();
        assert_eq!(out.bridge_template.as_deref(), Some("<p>install</p>"));
    }

    #[test]
    fn web_url_is_required() {
        let err = validate_content(content("", Some("myapp://x"), None)).unwrap_err();
        assert_eq!(err, invalid("webUrl required/format"));
    }
}
