//! Boundary to the remote protocol client
//!
//! An intent is a handle for acting in rooms as one account. The client
//! library that owns it also owns registration state, membership caches and
//! encryption keys; roomcast only drives it through [`DeliveryIntent`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Operations roomcast needs from a per-account session
#[async_trait]
pub trait DeliveryIntent: Send + Sync {
    /// Account this intent acts as
    fn user_id(&self) -> &str;

    /// Register the account if needed and make sure it is in the room.
    /// Repeated calls are no-ops.
    async fn ensure_registered_and_joined(&self, room_id: &str) -> Result<()>;

    /// Turn on encryption support for this session
    async fn enable_encryption(&self) -> Result<()>;

    /// Join the room
    async fn join_room(&self, room_id: &str) -> Result<()>;

    /// Tell the encryption subsystem the account is now a member, so room
    /// keys get shared with the current members
    async fn notify_room_join(&self, room_id: &str) -> Result<()>;

    /// Send through the managed path, which encrypts in encrypted rooms.
    /// Returns the event id.
    async fn send_event(&self, room_id: &str, event_type: &str, content: &Value)
        -> Result<String>;

    /// Send the content as-is, never encrypted. Returns the event id.
    async fn send_raw_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &Value,
    ) -> Result<String>;

    /// Set a state event. Returns the event id.
    async fn send_state_event(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &Value,
    ) -> Result<String>;
}

/// Shared intent handle
pub type IntentPtr = Arc<dyn DeliveryIntent>;

/// Hands out intents by account id
#[async_trait]
pub trait IntentProvider: Send + Sync {
    /// Intent acting as `user_id`. Providers may cache and return the same
    /// session for repeated calls.
    async fn intent(&self, user_id: &str) -> Result<IntentPtr>;
}

/// Shared provider handle
pub type IntentProviderPtr = Arc<dyn IntentProvider>;

/// Errors returned across the protocol client boundary
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Join failed: {0}")]
    Join(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("API error: {0}")]
    ApiError(String),
}

pub type Result<T> = std::result::Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_error_display() {
        let err = IntentError::Join("!room:hs forbidden".to_string());
        assert_eq!(err.to_string(), "Join failed: !room:hs forbidden");

        let err = IntentError::UnknownIdentity("@ghost:hs".to_string());
        assert_eq!(err.to_string(), "Unknown identity: @ghost:hs");
    }
}
