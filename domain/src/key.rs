//! Content-addressed key derivation.
//!
//! The key is a prefix of the unpadded base64url SHA-512 digest of a
//! canonical serialization of [`LinkContent`]. Identical content always
//! yields the same key, which is what makes duplicate registration
//! detectable without an index.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha512};

use crate::config::MAX_KEY_LENGTH;
use crate::{LinkContent, LinkKey};

const FIELD_SEP: char = '\u{1f}';
const ABSENT: char = '\u{0}';

/// Canonical byte form of the hashed fields. Absent values get their own
/// marker so `None` and `Some("")` never collide.
fn canonical(content: &LinkContent) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| ABSENT.to_string());
    [
        content.web_url.clone(),
        opt(&content.ios_url),
        opt(&content.aos_url),
        content.bridge_type.as_str().to_string(),
        opt(&content.bridge_template),
        content.app_call.as_str().to_string(),
    ]
    .join(&FIELD_SEP.to_string())
}

/// Derive the key for `content`, `key_length` characters long (clamped to
/// what the digest can provide).
pub fn derive_key(content: &LinkContent, key_length: usize) -> LinkKey {
    let digest = Sha512::digest(canonical(content).as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(key_length.clamp(1, MAX_KEY_LENGTH));
    // base64url output is always within the key charset.
    LinkKey(encoded)
}
