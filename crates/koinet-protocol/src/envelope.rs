//! Signed envelopes: the authentication layer wrapped around every
//! request and response body.
//!
//! The signature covers the canonical JSON of `{payload, source_node,
//! target_node}`, so neither the payload nor the addressing can be
//! altered without invalidating it.

use koinet_crypto::{Keypair, PublicKey};
use koinet_types::{KoiNetError, Result, Rid};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::canonical_json;

// ---------------------------------------------------------------------------
// UnsignedEnvelope
// ---------------------------------------------------------------------------

/// An envelope before signing: payload plus addressing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsignedEnvelope {
    /// The request or response model, as JSON.
    pub payload: Value,
    /// RID of the sending node.
    pub source_node: Rid,
    /// RID of the intended receiver.
    pub target_node: Rid,
}

impl UnsignedEnvelope {
    /// Wraps a serializable payload for `source` → `target`.
    pub fn wrap<T: Serialize>(payload: &T, source: Rid, target: Rid) -> Result<Self> {
        let payload = serde_json::to_value(payload).map_err(|e| KoiNetError::ProtocolError {
            reason: format!("failed to serialize envelope payload: {e}"),
        })?;
        Ok(Self {
            payload,
            source_node: source,
            target_node: target,
        })
    }

    /// The canonical bytes the signature is computed over.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self).map_err(|e| KoiNetError::ProtocolError {
            reason: format!("failed to serialize envelope: {e}"),
        })?;
        Ok(canonical_json(&value)?.into_bytes())
    }

    /// Signs this envelope with the sender's keypair.
    pub fn sign_with(self, keypair: &Keypair) -> Result<SignedEnvelope> {
        let signature = keypair.sign(&self.signable_bytes()?);
        Ok(SignedEnvelope {
            payload: self.payload,
            source_node: self.source_node,
            target_node: self.target_node,
            signature,
        })
    }
}

// ---------------------------------------------------------------------------
// SignedEnvelope
// ---------------------------------------------------------------------------

/// A signed envelope as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// The request or response model, as JSON.
    pub payload: Value,
    /// RID of the sending node.
    pub source_node: Rid,
    /// RID of the intended receiver.
    pub target_node: Rid,
    /// Base64 ECDSA signature over the unsigned envelope's canonical form.
    pub signature: String,
}

impl SignedEnvelope {
    /// Strips the signature, recovering the signable form.
    pub fn unsigned(&self) -> UnsignedEnvelope {
        UnsignedEnvelope {
            payload: self.payload.clone(),
            source_node: self.source_node.clone(),
            target_node: self.target_node.clone(),
        }
    }

    /// Verifies the signature against the sender's public key.
    ///
    /// Returns [`KoiNetError::InvalidSignature`] on any mismatch.
    pub fn verify_with(&self, public_key: &PublicKey) -> Result<()> {
        let bytes = self.unsigned().signable_bytes()?;
        public_key.verify(&bytes, &self.signature)
    }

    /// Deserializes the payload into a typed model.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| KoiNetError::ProtocolError {
            reason: format!("invalid envelope payload: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
