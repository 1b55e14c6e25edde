//! This node's own identity: RID, profile, and signing key.

use koinet_crypto::{Keypair, PublicKey};
use koinet_protocol::node::node_rid;
use koinet_protocol::{Bundle, NodeProfile, NodeProvides, NodeType};
use koinet_types::{KoiNetError, Result, Rid};

/// Static description of this node, fixed for the process lifetime.
///
/// The RID is derived from the node name and public key, so the same
/// name with a different key is a different identity.
pub struct NodeIdentity {
    rid: Rid,
    profile: NodeProfile,
    keypair: Keypair,
}

impl NodeIdentity {
    /// Builds an identity from a name, an optional advertised URL, the
    /// offered RID types, and a signing keypair.
    ///
    /// A node with a `base_url` is FULL (can receive pushes); without
    /// one it is PARTIAL (poll-only).
    pub fn new(
        name: &str,
        base_url: Option<String>,
        provides: NodeProvides,
        keypair: Keypair,
    ) -> Result<Self> {
        let public_key = keypair.public_key_der_b64()?;
        let node_type = if base_url.is_some() {
            NodeType::Full
        } else {
            NodeType::Partial
        };
        let rid = node_rid(name, &public_key);
        let profile = NodeProfile {
            base_url,
            node_type,
            provides,
            public_key,
        };
        Ok(Self {
            rid,
            profile,
            keypair,
        })
    }

    /// This node's RID.
    pub fn rid(&self) -> &Rid {
        &self.rid
    }

    /// This node's profile as announced to peers.
    pub fn profile(&self) -> &NodeProfile {
        &self.profile
    }

    /// The signing keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The public half of the keypair.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Bundles the profile under this node's RID, stamped now.
    pub fn bundle(&self) -> Result<Bundle> {
        let contents =
            serde_json::to_value(&self.profile).map_err(|e| KoiNetError::ProtocolError {
                reason: format!("failed to serialize own profile: {e}"),
            })?;
        Bundle::generate(self.rid.clone(), contents)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
