//! In-process stand-in for the remote protocol client
//!
//! Keeps membership, registration and key-sharing state in memory, records
//! every intent call in a journal, and enforces the preconditions a real
//! homeserver client would: sends need membership, and encrypted sends need
//! the room keys to have been shared after the join. Failures can be scripted
//! per room or per identity.

use crate::intent::{DeliveryIntent, IntentError, IntentProvider, IntentPtr, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One recorded intent call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum IntentCall {
    EnsureRegisteredAndJoined {
        user_id: String,
        room_id: String,
    },
    EnableEncryption {
        user_id: String,
    },
    JoinRoom {
        user_id: String,
        room_id: String,
    },
    NotifyRoomJoin {
        user_id: String,
        room_id: String,
    },
    SendEvent {
        user_id: String,
        room_id: String,
        event_type: String,
        content: Value,
    },
    SendRawEvent {
        user_id: String,
        room_id: String,
        event_type: String,
        content: Value,
    },
    SendStateEvent {
        user_id: String,
        room_id: String,
        event_type: String,
        state_key: String,
        content: Value,
    },
}

impl IntentCall {
    pub fn user_id(&self) -> &str {
        match self {
            IntentCall::EnsureRegisteredAndJoined { user_id, .. }
            | IntentCall::EnableEncryption { user_id }
            | IntentCall::JoinRoom { user_id, .. }
            | IntentCall::NotifyRoomJoin { user_id, .. }
            | IntentCall::SendEvent { user_id, .. }
            | IntentCall::SendRawEvent { user_id, .. }
            | IntentCall::SendStateEvent { user_id, .. } => user_id,
        }
    }

    /// Room the call targets; `None` for session-wide calls
    pub fn room_id(&self) -> Option<&str> {
        match self {
            IntentCall::EnableEncryption { .. } => None,
            IntentCall::EnsureRegisteredAndJoined { room_id, .. }
            | IntentCall::JoinRoom { room_id, .. }
            | IntentCall::NotifyRoomJoin { room_id, .. }
            | IntentCall::SendEvent { room_id, .. }
            | IntentCall::SendRawEvent { room_id, .. }
            | IntentCall::SendStateEvent { room_id, .. } => Some(room_id),
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(
            self,
            IntentCall::SendEvent { .. }
                | IntentCall::SendRawEvent { .. }
                | IntentCall::SendStateEvent { .. }
        )
    }
}

#[derive(Default)]
struct LoopbackState {
    journal: Vec<IntentCall>,
    registrations: HashMap<String, usize>,
    joined: HashSet<(String, String)>,
    encryption_enabled: HashSet<String>,
    keys_shared: HashSet<(String, String)>,
    failing_joins: HashSet<String>,
    failing_sends: HashSet<String>,
    rejected_identities: HashSet<String>,
    send_delay: Option<Duration>,
}

impl LoopbackState {
    fn register(&mut self, user_id: &str) -> Result<()> {
        if self.rejected_identities.contains(user_id) {
            return Err(IntentError::Registration(user_id.to_string()));
        }
        self.registrations.entry(user_id.to_string()).or_insert(1);
        Ok(())
    }

    fn join(&mut self, user_id: &str, room_id: &str) -> Result<()> {
        self.register(user_id)?;
        if self.failing_joins.contains(room_id) {
            return Err(IntentError::Join(format!("{} cannot join {}", user_id, room_id)));
        }
        self.joined
            .insert((user_id.to_string(), room_id.to_string()));
        Ok(())
    }

    /// Preconditions shared by every send
    fn check_send(&self, user_id: &str, room_id: &str) -> Result<()> {
        if self.failing_sends.contains(room_id) {
            return Err(IntentError::SendFailed(format!("{} rejected the event", room_id)));
        }
        if !self
            .joined
            .contains(&(user_id.to_string(), room_id.to_string()))
        {
            return Err(IntentError::SendFailed(format!(
                "{} is not in {}",
                user_id, room_id
            )));
        }
        Ok(())
    }
}

/// Provider whose intents act on shared in-memory state
#[derive(Clone, Default)]
pub struct LoopbackProvider {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins into `room_id` fail from now on
    pub fn fail_joins_in(&self, room_id: &str) {
        self.state.lock().failing_joins.insert(room_id.to_string());
    }

    /// Sends into `room_id` fail from now on
    pub fn fail_sends_in(&self, room_id: &str) {
        self.state.lock().failing_sends.insert(room_id.to_string());
    }

    /// `user_id` can neither be resolved nor registered
    pub fn reject_identity(&self, user_id: &str) {
        self.state
            .lock()
            .rejected_identities
            .insert(user_id.to_string());
    }

    /// Remove `user_id` from `room_id`, as a kick or leave would. Room keys
    /// shared for that membership are gone too.
    pub fn kick(&self, user_id: &str, room_id: &str) {
        let key = (user_id.to_string(), room_id.to_string());
        let mut state = self.state.lock();
        state.joined.remove(&key);
        state.keys_shared.remove(&key);
    }

    /// Delay every send call, to hold handlers in flight
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    /// Every call so far, in order
    pub fn journal(&self) -> Vec<IntentCall> {
        self.state.lock().journal.clone()
    }

    /// Calls made as `user_id`
    pub fn calls_by(&self, user_id: &str) -> Vec<IntentCall> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.user_id() == user_id)
            .cloned()
            .collect()
    }

    /// Calls made as `user_id` that target `room_id`
    pub fn calls_for(&self, user_id: &str, room_id: &str) -> Vec<IntentCall> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.user_id() == user_id && c.room_id() == Some(room_id))
            .cloned()
            .collect()
    }

    /// Successful or attempted send calls, in order
    pub fn sends(&self) -> Vec<IntentCall> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.is_send())
            .cloned()
            .collect()
    }

    pub fn is_joined(&self, user_id: &str, room_id: &str) -> bool {
        self.state
            .lock()
            .joined
            .contains(&(user_id.to_string(), room_id.to_string()))
    }

    /// Times `user_id` was actually registered (0 or 1)
    pub fn registration_count(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .registrations
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl IntentProvider for LoopbackProvider {
    async fn intent(&self, user_id: &str) -> Result<IntentPtr> {
        if self.state.lock().rejected_identities.contains(user_id) {
            return Err(IntentError::UnknownIdentity(user_id.to_string()));
        }
        Ok(Arc::new(LoopbackIntent {
            user_id: user_id.to_string(),
            state: self.state.clone(),
        }))
    }
}

/// Intent acting as one account on the loopback state
pub struct LoopbackIntent {
    user_id: String,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackIntent {
    fn record(&self, call: IntentCall) {
        self.state.lock().journal.push(call);
    }

    async fn pause(&self) {
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn new_event_id() -> String {
        format!("${}", uuid::Uuid::new_v4().simple())
    }
}

#[async_trait]
impl DeliveryIntent for LoopbackIntent {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn ensure_registered_and_joined(&self, room_id: &str) -> Result<()> {
        self.record(IntentCall::EnsureRegisteredAndJoined {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
        });
        self.state.lock().join(&self.user_id, room_id)
    }

    async fn enable_encryption(&self) -> Result<()> {
        self.record(IntentCall::EnableEncryption {
            user_id: self.user_id.clone(),
        });
        self.state
            .lock()
            .encryption_enabled
            .insert(self.user_id.clone());
        Ok(())
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        self.record(IntentCall::JoinRoom {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
        });
        self.state.lock().join(&self.user_id, room_id)
    }

    async fn notify_room_join(&self, room_id: &str) -> Result<()> {
        self.record(IntentCall::NotifyRoomJoin {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
        });
        let mut state = self.state.lock();
        let key = (self.user_id.clone(), room_id.to_string());
        if !state.encryption_enabled.contains(&self.user_id) {
            return Err(IntentError::Encryption(format!(
                "encryption is not enabled for {}",
                self.user_id
            )));
        }
        if !state.joined.contains(&key) {
            return Err(IntentError::Encryption(format!(
                "{} is not a member of {}",
                self.user_id, room_id
            )));
        }
        state.keys_shared.insert(key);
        Ok(())
    }

    async fn send_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &Value,
    ) -> Result<String> {
        self.record(IntentCall::SendEvent {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            event_type: event_type.to_string(),
            content: content.clone(),
        });
        {
            let state = self.state.lock();
            state.check_send(&self.user_id, room_id)?;
            let encrypting = state.encryption_enabled.contains(&self.user_id);
            let key = (self.user_id.clone(), room_id.to_string());
            if encrypting && !state.keys_shared.contains(&key) {
                return Err(IntentError::Encryption(format!(
                    "room keys for {} not shared yet",
                    room_id
                )));
            }
        }
        self.pause().await;
        let event_id = Self::new_event_id();
        debug!(user_id = %self.user_id, room_id = room_id, event_id = %event_id, "Loopback send");
        Ok(event_id)
    }

    async fn send_raw_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: &Value,
    ) -> Result<String> {
        self.record(IntentCall::SendRawEvent {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            event_type: event_type.to_string(),
            content: content.clone(),
        });
        self.state.lock().check_send(&self.user_id, room_id)?;
        self.pause().await;
        Ok(Self::new_event_id())
    }

    async fn send_state_event(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &Value,
    ) -> Result<String> {
        self.record(IntentCall::SendStateEvent {
            user_id: self.user_id.clone(),
            room_id: room_id.to_string(),
            event_type: event_type.to_string(),
            state_key: state_key.to_string(),
            content: content.clone(),
        });
        self.state.lock().check_send(&self.user_id, room_id)?;
        self.pause().await;
        Ok(Self::new_event_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_requires_membership() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();

        let err = intent
            .send_raw_event("!r:hs", "m.room.message", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::SendFailed(_)));

        intent.ensure_registered_and_joined("!r:hs").await.unwrap();
        let event_id = intent
            .send_raw_event("!r:hs", "m.room.message", &json!({}))
            .await
            .unwrap();
        assert!(event_id.starts_with('$'));
    }

    #[tokio::test]
    async fn test_encrypted_send_requires_shared_keys() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();

        intent.enable_encryption().await.unwrap();
        intent.join_room("!r:hs").await.unwrap();
        let err = intent
            .send_event("!r:hs", "m.room.message", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::Encryption(_)));

        intent.notify_room_join("!r:hs").await.unwrap();
        assert!(intent
            .send_event("!r:hs", "m.room.message", &json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_notify_before_join_fails() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();
        intent.enable_encryption().await.unwrap();

        let err = intent.notify_room_join("!r:hs").await.unwrap_err();
        assert!(matches!(err, IntentError::Encryption(_)));
    }

    #[tokio::test]
    async fn test_rejected_identity() {
        let provider = LoopbackProvider::new();
        provider.reject_identity("@ghost:hs");

        let err = provider.intent("@ghost:hs").await.err().unwrap();
        assert!(matches!(err, IntentError::UnknownIdentity(_)));
    }

    #[tokio::test]
    async fn test_journal_serializes_with_call_tag() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();
        intent.join_room("!r:hs").await.unwrap();

        let value = serde_json::to_value(provider.journal()).unwrap();
        assert_eq!(
            value,
            json!([{"call": "join_room", "user_id": "@bot:hs", "room_id": "!r:hs"}])
        );
    }
}
