//! Envelope signing and validation.
//!
//! Validation resolves the sender's profile, checks the RID/key
//! binding, verifies the signature, and checks the envelope is
//! addressed to us. Resolution has a bootstrap fallback: an unknown
//! sender is accepted if its own payload carries a self-announcing NEW
//! event with a profile that passes the same checks.

use std::sync::Arc;

use koinet_crypto::PublicKey;
use koinet_protocol::api::EventsPayload;
use koinet_protocol::node::verify_key_binding;
use koinet_protocol::{EventType, NodeProfile, SignedEnvelope, UnsignedEnvelope};
use koinet_types::{KoiNetError, Result, Rid};
use serde::Serialize;
use tracing::debug;

use crate::effector::{DerefOptions, Effector};
use crate::identity::NodeIdentity;

/// Envelope service bound to this node's identity.
pub struct Secure {
    identity: Arc<NodeIdentity>,
    effector: Arc<Effector>,
}

impl Secure {
    /// Creates the service.
    pub fn new(identity: Arc<NodeIdentity>, effector: Arc<Effector>) -> Self {
        Self { identity, effector }
    }

    /// Wraps and signs a payload addressed to `target`.
    pub fn create_envelope<T: Serialize>(
        &self,
        payload: &T,
        target: &Rid,
    ) -> Result<SignedEnvelope> {
        UnsignedEnvelope::wrap(payload, self.identity.rid().clone(), target.clone())?
            .sign_with(self.identity.keypair())
    }

    /// Validates an inbound envelope.
    ///
    /// # Errors
    ///
    /// [`KoiNetError::UnknownNode`] if the sender cannot be resolved,
    /// [`KoiNetError::InvalidKey`] if the sender's RID does not bind to
    /// its key, [`KoiNetError::InvalidSignature`] on verification
    /// failure, and [`KoiNetError::InvalidTarget`] if the envelope is
    /// addressed elsewhere.
    pub async fn validate_envelope(&self, envelope: &SignedEnvelope) -> Result<()> {
        let profile = self.resolve_sender(envelope).await?;

        // Cheap binding check before the cryptographic verify.
        verify_key_binding(&envelope.source_node, &profile.public_key)?;

        let public_key =
            PublicKey::from_der_b64(&profile.public_key).map_err(|_| KoiNetError::InvalidKey {
                rid: envelope.source_node.as_str().to_string(),
            })?;
        envelope.verify_with(&public_key)?;

        if envelope.target_node != *self.identity.rid() {
            return Err(KoiNetError::InvalidTarget {
                target: envelope.target_node.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the sender's profile, locally first, then from the
    /// envelope's own payload (bootstrap).
    async fn resolve_sender(&self, envelope: &SignedEnvelope) -> Result<NodeProfile> {
        if let Some(bundle) = self
            .effector
            .dereference_with(&envelope.source_node, DerefOptions::local_only())
            .await?
        {
            return bundle.validate_contents();
        }

        if let Some(profile) = self_announced_profile(envelope) {
            debug!(source = %envelope.source_node, "sender resolved from its own payload");
            return Ok(profile);
        }

        Err(KoiNetError::UnknownNode {
            rid: envelope.source_node.as_str().to_string(),
        })
    }
}

/// Scans an envelope payload for a NEW event announcing the sender
/// itself, and extracts the carried profile.
fn self_announced_profile(envelope: &SignedEnvelope) -> Option<NodeProfile> {
    let payload: EventsPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
    payload
        .events
        .iter()
        .find(|e| e.event_type == EventType::New && e.rid == envelope.source_node)
        .and_then(|e| e.contents.clone())
        .and_then(|contents| serde_json::from_value(contents).ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_crypto::Keypair;
    use koinet_protocol::{Event, NodeProvides};
    use koinet_storage::{Cache, MemoryCache};
    use serde_json::json;

    use crate::pipeline::KnowledgeQueue;

    fn identity(name: &str) -> Arc<NodeIdentity> {
        match NodeIdentity::new(name, None, NodeProvides::default(), Keypair::generate()) {
            Ok(id) => Arc::new(id),
            Err(e) => panic!("identity: {e}"),
        }
    }

    fn secure_for(me: &Arc<NodeIdentity>, cache: Arc<MemoryCache>) -> Secure {
        let queue = Arc::new(KnowledgeQueue::new());
        let effector = Arc::new(Effector::new(me.rid().clone(), cache, queue));
        Secure::new(me.clone(), effector)
    }

    #[tokio::test]
    async fn self_signed_envelope_validates_when_profile_cached() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let cache = Arc::new(MemoryCache::new());
        cache.write(&alice.bundle()?)?;

        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));
        let envelope = alice_secure.create_envelope(&json!({"k": 1}), bob.rid())?;

        let bob_cache = Arc::new(MemoryCache::new());
        bob_cache.write(&alice.bundle()?)?;
        let bob_secure = secure_for(&bob, bob_cache);
        bob_secure.validate_envelope(&envelope).await
    }

    #[tokio::test]
    async fn unknown_sender_is_rejected() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));
        let envelope = alice_secure.create_envelope(&json!({}), bob.rid())?;

        let bob_secure = secure_for(&bob, Arc::new(MemoryCache::new()));
        match bob_secure.validate_envelope(&envelope).await {
            Err(KoiNetError::UnknownNode { .. }) => Ok(()),
            other => panic!("expected UnknownNode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bootstrap_fallback_accepts_self_announcement() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));

        let payload = EventsPayload {
            events: vec![Event::from_bundle(EventType::New, alice.bundle()?)],
        };
        let envelope = alice_secure.create_envelope(&payload, bob.rid())?;

        let bob_secure = secure_for(&bob, Arc::new(MemoryCache::new()));
        bob_secure.validate_envelope(&envelope).await
    }

    #[tokio::test]
    async fn corrupted_signature_fails() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));
        let mut envelope = alice_secure.create_envelope(&json!({}), bob.rid())?;
        envelope.signature = {
            let mut s = envelope.signature.clone();
            // Flip the first character to another base64 symbol.
            let replacement = if s.starts_with('A') { "B" } else { "A" };
            s.replace_range(0..1, replacement);
            s
        };

        let bob_cache = Arc::new(MemoryCache::new());
        bob_cache.write(&alice.bundle()?)?;
        let bob_secure = secure_for(&bob, bob_cache);
        match bob_secure.validate_envelope(&envelope).await {
            Err(KoiNetError::InvalidSignature { .. }) => Ok(()),
            other => panic!("expected InvalidSignature, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn swapped_public_key_fails_binding() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));
        let envelope = alice_secure.create_envelope(&json!({}), bob.rid())?;

        // Cache a profile for alice's RID carrying a different key.
        let imposter = Keypair::generate();
        let mut profile = alice.profile().clone();
        profile.public_key = imposter.public_key_der_b64()?;
        let bundle = koinet_protocol::Bundle::generate(
            alice.rid().clone(),
            serde_json::to_value(&profile).map_err(|e| KoiNetError::ProtocolError {
                reason: e.to_string(),
            })?,
        )?;
        let bob_cache = Arc::new(MemoryCache::new());
        bob_cache.write(&bundle)?;

        let bob_secure = secure_for(&bob, bob_cache);
        match bob_secure.validate_envelope(&envelope).await {
            Err(KoiNetError::InvalidKey { .. }) => Ok(()),
            other => panic!("expected InvalidKey, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn misaddressed_envelope_fails_target_check() -> Result<()> {
        let alice = identity("alice");
        let bob = identity("bob");
        let carol = identity("carol");
        let alice_secure = secure_for(&alice, Arc::new(MemoryCache::new()));
        let envelope = alice_secure.create_envelope(&json!({}), carol.rid())?;

        let bob_cache = Arc::new(MemoryCache::new());
        bob_cache.write(&alice.bundle()?)?;
        let bob_secure = secure_for(&bob, bob_cache);
        match bob_secure.validate_envelope(&envelope).await {
            Err(KoiNetError::InvalidTarget { .. }) => Ok(()),
            other => panic!("expected InvalidTarget, got {other:?}"),
        }
    }
}
