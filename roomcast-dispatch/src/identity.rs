//! Delivery identity resolution

use crate::intent::{DeliveryIntent, IntentProviderPtr, IntentPtr, Result};
use tracing::debug;

/// Maps an optional sender to the intent that delivers as it
pub struct IdentityResolver {
    provider: IntentProviderPtr,
    default_identity: String,
}

impl IdentityResolver {
    /// Create a resolver falling back to `default_identity`
    pub fn new(provider: IntentProviderPtr, default_identity: impl Into<String>) -> Self {
        Self {
            provider,
            default_identity: default_identity.into(),
        }
    }

    /// System account used when no sender is given
    pub fn default_identity(&self) -> &str {
        &self.default_identity
    }

    /// Account a request is delivered as. Blank senders count as absent.
    pub fn identity_for<'a>(&'a self, sender: Option<&'a str>) -> &'a str {
        match sender.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => &self.default_identity,
        }
    }

    /// Resolve the intent for `sender`
    pub async fn resolve(&self, sender: Option<&str>) -> Result<IntentPtr> {
        let identity = self.identity_for(sender);
        debug!(identity = identity, "Resolving delivery identity");
        self.provider.intent(identity).await
    }

    /// Make sure the intent is registered and in the room. Safe to repeat.
    pub async fn prepare(&self, intent: &dyn DeliveryIntent, room_id: &str) -> Result<()> {
        intent.ensure_registered_and_joined(room_id).await?;
        debug!(identity = intent.user_id(), room_id = room_id, "Identity ready in room");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{IntentCall, LoopbackProvider};
    use std::sync::Arc;

    fn resolver(provider: &LoopbackProvider) -> IdentityResolver {
        IdentityResolver::new(Arc::new(provider.clone()), "@bot:hs")
    }

    #[test]
    fn test_identity_for() {
        let provider = LoopbackProvider::new();
        let resolver = resolver(&provider);

        assert_eq!(resolver.identity_for(None), "@bot:hs");
        assert_eq!(resolver.identity_for(Some("")), "@bot:hs");
        assert_eq!(resolver.identity_for(Some("  ")), "@bot:hs");
        assert_eq!(resolver.identity_for(Some("@alice:hs")), "@alice:hs");
    }

    #[tokio::test]
    async fn test_resolve_default_and_sender() {
        let provider = LoopbackProvider::new();
        let resolver = resolver(&provider);

        let bot = resolver.resolve(None).await.unwrap();
        assert_eq!(bot.user_id(), "@bot:hs");

        let alice = resolver.resolve(Some("@alice:hs")).await.unwrap();
        assert_eq!(alice.user_id(), "@alice:hs");
    }

    #[tokio::test]
    async fn test_resolve_rejected_identity() {
        let provider = LoopbackProvider::new();
        provider.reject_identity("@mallory:hs");
        let resolver = resolver(&provider);

        assert!(resolver.resolve(Some("@mallory:hs")).await.is_err());
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let provider = LoopbackProvider::new();
        let resolver = resolver(&provider);
        let intent = resolver.resolve(None).await.unwrap();

        resolver.prepare(intent.as_ref(), "!r:hs").await.unwrap();
        resolver.prepare(intent.as_ref(), "!r:hs").await.unwrap();

        assert!(provider.is_joined("@bot:hs", "!r:hs"));
        let ensures = provider
            .calls_for("@bot:hs", "!r:hs")
            .into_iter()
            .filter(|c| matches!(c, IntentCall::EnsureRegisteredAndJoined { .. }))
            .count();
        assert_eq!(ensures, 2);
        assert_eq!(provider.registration_count("@bot:hs"), 1);
    }
}
