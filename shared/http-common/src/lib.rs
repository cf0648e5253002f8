//! Shared HTTP utilities for the link bridge workspace.
//!
//! Provides common response bodies, key checks, URL building and time
//! conversions used by api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_key" => "Invalid key format",
        "missing_parameter" => "Missing template parameter",
        "unauthorized" => "Authentication required",
        "forbidden" => "Access denied",
        "conflict" => "Resource already exists",
        "duplicate" => "A link with the same content already exists",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Whether `s` can name a stored link: exactly `len` characters of
/// `[A-Za-z0-9_-]`. Anything else can be answered as "not found" without a
/// storage lookup.
pub fn is_valid_key(s: &str, len: usize) -> bool {
    s.len() == len
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ============================================================================
// URL Building
// ============================================================================

/// Build a public URL for `path` (no leading slash).
///
/// Uses `public_origin` when set, otherwise `https://{host}/{path}`, or
/// `/{path}` if the host is unknown too.
pub fn build_public_url(public_origin: Option<&str>, host: &str, path: &str) -> String {
    if let Some(origin) = public_origin.filter(|o| !o.is_empty()) {
        return format!("{}/{}", origin.trim_end_matches('/'), path);
    }
    if host.is_empty() {
        format!("/{}", path)
    } else {
        format!("https://{}/{}", host, path)
    }
}

/// Origin part (`scheme://host`) of a public URL setting, or of the host.
pub fn public_origin(public_origin: Option<&str>, host: &str) -> String {
    match public_origin.filter(|o| !o.is_empty()) {
        Some(origin) => origin.trim_end_matches('/').to_string(),
        None if host.is_empty() => String::new(),
        None => format!("https://{}", host),
    }
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 string to SystemTime.
///
/// Returns an error if the string is not a valid RFC3339 timestamp.
pub fn parse_rfc3339(s: &str) -> Result<SystemTime, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(s)?;
    Ok(dt.with_timezone(&Utc).into())
}

/// Milliseconds since the UNIX epoch; times before the epoch map to 0.
pub fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn millis_to_system_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_err() {
        let err = json_err("not_found");
        assert_eq!(err, serde_json::json!({"error": {"code": "not_found", "message": "Resource not found"}}));

        // Unknown code falls back to code as message
        let err = json_err("custom_error");
        assert_eq!(err, serde_json::json!({"error": {"code": "custom_error", "message": "custom_error"}}));
    }

    #[test]
    fn test_json_error_with_message() {
        let err = json_error_with_message("bad_request", "Invalid input");
        assert_eq!(
            err,
            serde_json::json!({"error": {"code": "bad_request", "message": "Invalid input"}})
        );
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abcd1234", 8));
        assert!(is_valid_key("A0-_zZ9x", 8));
        assert!(!is_valid_key("abcd123", 8)); // too short
        assert!(!is_valid_key("abcd12345", 8)); // too long
        assert!(!is_valid_key("abc!1234", 8)); // special chars not allowed
    }

    #[test]
    fn test_build_public_url() {
        assert_eq!(
            build_public_url(Some("https://go.acme.com/"), "ignored", "abc"),
            "https://go.acme.com/abc"
        );
        assert_eq!(build_public_url(None, "example.com", "abc"), "https://example.com/abc");
        assert_eq!(build_public_url(Some(""), "", "abc"), "/abc");
    }

    #[test]
    fn test_public_origin() {
        assert_eq!(public_origin(Some("https://go.acme.com/"), "x"), "https://go.acme.com");
        assert_eq!(public_origin(None, "example.com"), "https://example.com");
        assert_eq!(public_origin(None, ""), "");
    }

    #[test]
    fn test_time_conversions() {
        let t = millis_to_system_time(1_700_000_000_123);
        assert_eq!(system_time_to_millis(t), 1_700_000_000_123);
        assert_eq!(system_time_to_rfc3339(t), "2023-11-14T22:13:20Z");
        let parsed = parse_rfc3339("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(system_time_to_millis(parsed), 1_700_000_000_000);
        assert!(parse_rfc3339("yesterday").is_err());
    }
}
