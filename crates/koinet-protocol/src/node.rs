//! Node profiles and identity binding.

use koinet_crypto::hash::sha256_hex;
use koinet_types::{KoiNetError, Result, Rid};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NodeType / NodeProvides
// ---------------------------------------------------------------------------

/// Whether a node runs a server or participates by polling only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Runs an HTTP server; reachable at `base_url`.
    Full,
    /// No server; communicates by polling its neighbors.
    Partial,
}

/// RID type prefixes a node offers to its peers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeProvides {
    /// Prefixes the node emits events for.
    #[serde(default)]
    pub event: Vec<String>,
    /// Prefixes the node serves state (bundles) for.
    #[serde(default)]
    pub state: Vec<String>,
}

// ---------------------------------------------------------------------------
// NodeProfile
// ---------------------------------------------------------------------------

/// Self-description a node publishes as the contents of its own bundle.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Server URL; absent for partial nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Full (server) or partial (poll-only).
    pub node_type: NodeType,
    /// RID type prefixes offered to peers.
    #[serde(default)]
    pub provides: NodeProvides,
    /// Base64-encoded SPKI DER public key.
    pub public_key: String,
}

/// Derives a node RID from its name and public key.
///
/// The RID embeds `sha256(public_key)` after a `+` separator, binding
/// the identity to the key: a peer can verify the binding from the
/// profile alone, without trusting the sender.
pub fn node_rid(name: &str, public_key_b64: &str) -> Rid {
    Rid::new(format!(
        "{}:{}+{}",
        Rid::NODE_PREFIX,
        name,
        sha256_hex(public_key_b64)
    ))
}

/// Checks that `rid` ends with the hash of `public_key_b64`.
///
/// Returns [`KoiNetError::InvalidKey`] when the binding does not hold.
pub fn verify_key_binding(rid: &Rid, public_key_b64: &str) -> Result<()> {
    let expected = format!("+{}", sha256_hex(public_key_b64));
    if rid.as_str().ends_with(&expected) {
        Ok(())
    } else {
        Err(KoiNetError::InvalidKey {
            rid: rid.as_str().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
