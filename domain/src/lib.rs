//! Domain library for the link bridge.
//!
//! Holds the link model, the ports (traits) adapters implement, the error
//! type, and the resolution engine: template parsing and substitution,
//! record validation, device classification, the redirect decision table and
//! content-addressed key derivation. Keep HTTP and storage IO out of this
//! crate.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Opaque short identifier of a link (`[A-Za-z0-9_-]`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey(String);

impl LinkKey {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidKey("empty".into()));
        }
        if !val
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidKey("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email address of the user registering links.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        // Lightweight check; full RFC compliance not required here
        if val.is_empty() || !val.contains('@') {
            return Err(CoreError::InvalidUserEmail);
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a web fallback is ever shown for a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeType {
    #[default]
    Normal,
    AppOnly,
    AppNudge,
}

impl BridgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeType::Normal => "normal",
            BridgeType::AppOnly => "app_only",
            BridgeType::AppNudge => "app_nudge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(BridgeType::Normal),
            "app_only" => Some(BridgeType::AppOnly),
            "app_nudge" => Some(BridgeType::AppNudge),
            _ => None,
        }
    }
}

/// When the automatic app-open attempt fires on the interstitial page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppCall {
    None,
    SafeOnly,
    #[default]
    Always,
}

impl AppCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppCall::None => "none",
            AppCall::SafeOnly => "safe_only",
            AppCall::Always => "always",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(AppCall::None),
            "safe_only" => Some(AppCall::SafeOnly),
            "always" => Some(AppCall::Always),
            _ => None,
        }
    }
}

/// Canonical content of a link. These are exactly the fields hashed for
/// deduplication; dates and provenance live on [`LinkRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkContent {
    pub web_url: String,
    pub ios_url: Option<String>,
    pub aos_url: Option<String>,
    pub bridge_type: BridgeType,
    /// Only meaningful for `BridgeType::AppOnly`; cleared otherwise.
    pub bridge_template: Option<String>,
    pub app_call: AppCall,
}

impl LinkContent {
    /// Content with only a web target and default policies.
    pub fn web_only<S: Into<String>>(web_url: S) -> Self {
        Self {
            web_url: web_url.into(),
            ios_url: None,
            aos_url: None,
            bridge_type: BridgeType::Normal,
            bridge_template: None,
            app_call: AppCall::Always,
        }
    }
}

/// Stored link. Never patched field by field: edits replace the record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    pub key: LinkKey,
    pub content: LinkContent,
    pub expire_date: SystemTime,
    pub register_date: SystemTime,
    pub register_name: String,
    pub register_email: UserEmail,
}

impl LinkRecord {
    /// Check if the record has expired based on the given current time.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expire_date
    }

    pub fn is_owned_by(&self, email: &UserEmail) -> bool {
        self.register_email.as_str().eq_ignore_ascii_case(email.as_str())
    }
}

/// Input data for registering a new link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLink {
    pub content: LinkContent,
    pub expire_date: SystemTime,
    /// Caller-supplied key; when absent the key is derived from the content.
    pub custom_key: Option<LinkKey>,
    pub register_name: String,
    pub register_email: UserEmail,
}

/// Replacement content for an existing link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEdit {
    pub content: LinkContent,
    pub expire_date: SystemTime,
}

/// Result of an edit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Submitted content equals the stored record; nothing was written.
    Unchanged,
    Updated,
}

/// The user performing an admin operation, as identified by the auth layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub email: UserEmail,
    pub name: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn can_modify(&self, record: &LinkRecord) -> bool {
        self.is_admin || record.is_owned_by(&self.email)
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Repository port for persisting and loading links.
///
/// `get` and `get_all` never return expired records and report a missing key
/// as `Ok(None)`, not as an error.
pub trait LinkRepository: Send + Sync {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError>;
    /// All live records, or only those among `keys` when given.
    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError>;
    /// Insert or replace the record stored under `record.key`.
    fn set(&self, record: LinkRecord) -> Result<(), CoreError>;
    /// Delete the given keys, returning how many existed.
    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError>;
}

impl<R: LinkRepository + ?Sized> LinkRepository for std::sync::Arc<R> {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        (**self).get(key)
    }

    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        (**self).get_all(keys)
    }

    fn set(&self, record: LinkRecord) -> Result<(), CoreError> {
        (**self).set(record)
    }

    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError> {
        (**self).delete(keys)
    }
}

/// Core domain errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid user email")]
    InvalidUserEmail,
    #[error("duplicate of existing link {0}")]
    Duplicate(LinkKey),
    #[error("resource already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("repository error: {0}")]
    Repository(String),
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - link bridge engine", pkg, ver)
}

pub mod adapters;
pub mod config;
pub mod decision;
pub mod device;
pub mod key;
pub mod service;
pub mod template;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_new_accepts_simple_values() {
        let k = LinkKey::new("aB3-_x9Z").expect("valid key");
        assert_eq!(k.as_str(), "aB3-_x9Z");
    }

    #[test]
    fn key_rejects_empty_and_bad_chars() {
        assert!(matches!(LinkKey::new(""), Err(CoreError::InvalidKey(_))));
        assert!(matches!(
            LinkKey::new("bad/key!"),
            Err(CoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn user_email_basic_validation() {
        assert!(UserEmail::new("user@example.com").is_ok());
        assert!(matches!(
            UserEmail::new("not-an-email"),
            Err(CoreError::InvalidUserEmail)
        ));
    }

    #[test]
    fn policy_enums_parse_wire_names() {
        assert_eq!(BridgeType::parse("app_only"), Some(BridgeType::AppOnly));
        assert_eq!(BridgeType::parse("APP_NUDGE"), Some(BridgeType::AppNudge));
        assert_eq!(BridgeType::parse("other"), None);
        assert_eq!(AppCall::parse("safe_only"), Some(AppCall::SafeOnly));
        assert_eq!(AppCall::SafeOnly.as_str(), "safe_only");
        assert_eq!(AppCall::default(), AppCall::Always);
        assert_eq!(BridgeType::default(), BridgeType::Normal);
    }

    #[test]
    fn actor_ownership_rules() {
        let owner = UserEmail::new("owner@acme.com").unwrap();
        let record = LinkRecord {
            key: LinkKey::new("abcdefgh").unwrap(),
            content: LinkContent::web_only("https://acme.com"),
            expire_date: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(10),
            register_date: SystemTime::UNIX_EPOCH,
            register_name: "Owner".into(),
            register_email: owner.clone(),
        };
        let same = Actor {
            email: UserEmail::new("OWNER@acme.com").unwrap(),
            name: "Owner".into(),
            is_admin: false,
        };
        let other = Actor {
            email: UserEmail::new("other@acme.com").unwrap(),
            name: "Other".into(),
            is_admin: false,
        };
        let admin = Actor {
            is_admin: true,
            ..other.clone()
        };
        assert!(same.can_modify(&record));
        assert!(!other.can_modify(&record));
        assert!(admin.can_modify(&record));
        assert!(record.is_expired(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(10)));
        assert!(!record.is_expired(SystemTime::UNIX_EPOCH));
    }
}
