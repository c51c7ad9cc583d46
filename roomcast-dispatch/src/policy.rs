//! Plaintext vs encrypted send path selection

use roomcast_core::config::EncryptionConfig;
use serde_json::Value;

/// Which intent call delivers a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Managed send, encrypted in encrypted rooms
    Encrypted,
    /// Raw send, always cleartext
    Raw,
}

/// Whether a message of `subtype` should be encrypted, assuming encryption is
/// globally enabled.
///
/// Only notices can opt out, and only by setting `encrypt_notices` to false.
pub fn should_encrypt(subtype: &str, config: Option<&EncryptionConfig>) -> bool {
    if subtype != "notice" {
        return true;
    }
    config.and_then(|c| c.encrypt_notices).unwrap_or(true)
}

/// Pick the send path for a message
pub fn choose_path(subtype: &str, config: &EncryptionConfig) -> SendPath {
    if config.enabled && should_encrypt(subtype, Some(config)) {
        SendPath::Encrypted
    } else {
        SendPath::Raw
    }
}

/// Message subtype from event content, with any `m.` namespace stripped.
/// Content without a `msgtype` has an empty subtype.
pub fn message_subtype(content: &Value) -> &str {
    let msgtype = content.get("msgtype").and_then(Value::as_str).unwrap_or("");
    msgtype.strip_prefix("m.").unwrap_or(msgtype)
}
