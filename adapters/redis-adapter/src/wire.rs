//! JSON value stored under each `links:<key>` entry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{AppCall, BridgeType, CoreError, LinkContent, LinkKey, LinkRecord, UserEmail};
use serde::{Deserialize, Serialize};

/// Stored form of a link. Older entries predate `bridgeType`/`appCall` and
/// carry a boolean `appOnly` instead.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredLink {
    pub web_url: String,
    #[serde(default)]
    pub ios_url: Option<String>,
    #[serde(default)]
    pub aos_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_type: Option<BridgeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_call: Option<AppCall>,
    #[serde(default, skip_serializing)]
    pub app_only: bool,
    /// Milliseconds since the epoch.
    pub expire_date: u64,
    pub register_date: u64,
    pub register_name: String,
    pub register_email: String,
}

fn to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

fn from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

impl From<&LinkRecord> for StoredLink {
    fn from(r: &LinkRecord) -> Self {
        let c = &r.content;
        Self {
            web_url: c.web_url.clone(),
            ios_url: c.ios_url.clone(),
            aos_url: c.aos_url.clone(),
            bridge_type: Some(c.bridge_type),
            bridge_template: c.bridge_template.clone(),
            app_call: Some(c.app_call),
            app_only: false,
            expire_date: to_millis(r.expire_date),
            register_date: to_millis(r.register_date),
            register_name: r.register_name.clone(),
            register_email: r.register_email.as_str().to_string(),
        }
    }
}

impl StoredLink {
    pub(crate) fn into_record(self, key: LinkKey) -> Result<LinkRecord, CoreError> {
        let bridge_type = self.bridge_type.unwrap_or(if self.app_only {
            BridgeType::AppOnly
        } else {
            BridgeType::Normal
        });
        let register_email = UserEmail::new(self.register_email)
            .map_err(|_| CoreError::Repository("bad registerEmail".into()))?;
        Ok(LinkRecord {
            key,
            content: LinkContent {
                web_url: self.web_url,
                ios_url: self.ios_url.filter(|s| !s.is_empty()),
                aos_url: self.aos_url.filter(|s| !s.is_empty()),
                bridge_type,
                bridge_template: self.bridge_template,
                app_call: self.app_call.unwrap_or_default(),
            },
            expire_date: from_millis(self.expire_date),
            register_date: from_millis(self.register_date),
            register_name: self.register_name,
            register_email,
        })
    }
}

pub(crate) fn encode(record: &LinkRecord) -> Result<String, CoreError> {
    serde_json::to_string(&StoredLink::from(record))
        .map_err(|e| CoreError::Repository(format!("serialize link: {e}")))
}

pub(crate) fn decode(key: LinkKey, data: &str) -> Result<LinkRecord, CoreError> {
    let stored: StoredLink = serde_json::from_str(data)
        .map_err(|e| CoreError::Repository(format!("deserialize link: {e}")))?;
    stored.into_record(key)
}
