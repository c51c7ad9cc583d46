//! Encryption bootstrap ordering
//!
//! Before an encrypted send as an account into a room, the session
//! must have encryption enabled, be a member of the room, and the encryption
//! subsystem must have been told about that membership. Only then are room
//! keys shared with every current member, so nobody receives ciphertext they
//! cannot decrypt.

use crate::intent::{DeliveryIntent, Result};
use tracing::debug;

/// Runs enable -> join -> notify ahead of an encrypted send.
///
/// Nothing is remembered between sends. Membership can change at any time
/// (kicks, leaves), so the full sequence runs before every encrypted send and
/// the protocol client keeps each step idempotent.
#[derive(Debug, Default, Clone, Copy)]
pub struct EncryptionBootstrapper;

impl EncryptionBootstrapper {
    pub fn new() -> Self {
        Self
    }

    /// Prepare `intent` for an encrypted send into `room_id`. A failed step
    /// aborts the sequence.
    pub async fn bootstrap(&self, intent: &dyn DeliveryIntent, room_id: &str) -> Result<()> {
        intent.enable_encryption().await?;
        intent.join_room(room_id).await?;
        intent.notify_room_join(room_id).await?;

        debug!(identity = intent.user_id(), room_id = room_id, "Encryption bootstrapped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentProvider;
    use crate::loopback::{IntentCall, LoopbackProvider};

    #[tokio::test]
    async fn test_bootstrap_order() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();
        let bootstrapper = EncryptionBootstrapper::new();

        bootstrapper.bootstrap(intent.as_ref(), "!r:hs").await.unwrap();

        let calls = provider.calls_by("@bot:hs");
        assert!(matches!(calls[0], IntentCall::EnableEncryption { .. }));
        assert!(matches!(calls[1], IntentCall::JoinRoom { .. }));
        assert!(matches!(calls[2], IntentCall::NotifyRoomJoin { .. }));
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_bootstrap_repeats_for_every_send() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();
        let bootstrapper = EncryptionBootstrapper::new();

        bootstrapper.bootstrap(intent.as_ref(), "!a:hs").await.unwrap();
        bootstrapper.bootstrap(intent.as_ref(), "!a:hs").await.unwrap();
        bootstrapper.bootstrap(intent.as_ref(), "!b:hs").await.unwrap();

        // enable, join, notify each time
        assert_eq!(provider.calls_by("@bot:hs").len(), 9);
        assert_eq!(provider.calls_for("@bot:hs", "!a:hs").len(), 4);
        assert_eq!(provider.calls_for("@bot:hs", "!b:hs").len(), 2);
        assert!(provider.is_joined("@bot:hs", "!a:hs"));
    }

    #[tokio::test]
    async fn test_failed_join_stops_sequence() {
        let provider = LoopbackProvider::new();
        provider.fail_joins_in("!locked:hs");
        let intent = provider.intent("@bot:hs").await.unwrap();
        let bootstrapper = EncryptionBootstrapper::new();

        assert!(bootstrapper.bootstrap(intent.as_ref(), "!locked:hs").await.is_err());

        // No notify after a failed join
        let calls = provider.calls_for("@bot:hs", "!locked:hs");
        assert!(!calls
            .iter()
            .any(|c| matches!(c, IntentCall::NotifyRoomJoin { .. })));
    }

    #[tokio::test]
    async fn test_bootstrap_rejoins_after_kick() {
        let provider = LoopbackProvider::new();
        let intent = provider.intent("@bot:hs").await.unwrap();
        let bootstrapper = EncryptionBootstrapper::new();

        bootstrapper.bootstrap(intent.as_ref(), "!r:hs").await.unwrap();
        provider.kick("@bot:hs", "!r:hs");
        assert!(!provider.is_joined("@bot:hs", "!r:hs"));

        bootstrapper.bootstrap(intent.as_ref(), "!r:hs").await.unwrap();
        assert!(provider.is_joined("@bot:hs", "!r:hs"));
    }
}
