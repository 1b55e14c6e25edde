//! Edge profiles: directed subscriptions between nodes.

use koinet_crypto::hash::sha256_hex;
use koinet_types::{Result, Rid};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;

// ---------------------------------------------------------------------------
// EdgeStatus / EdgeType
// ---------------------------------------------------------------------------

/// Lifecycle state of an edge.
///
/// Edges start PROPOSED (created by the subscriber) and become APPROVED
/// when the source accepts. Only APPROVED edges route events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeStatus {
    /// Awaiting approval from the source node.
    Proposed,
    /// Accepted; events flow along this edge.
    Approved,
}

/// How events travel along an edge.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Source pushes events to the target's broadcast endpoint.
    Webhook,
    /// Target polls the source's poll endpoint.
    Poll,
}

// ---------------------------------------------------------------------------
// EdgeProfile
// ---------------------------------------------------------------------------

/// A directed subscription: events about `rid_types` flow from `source`
/// to `target`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EdgeProfile {
    /// Node the events come from.
    pub source: Rid,
    /// Node the events go to.
    pub target: Rid,
    /// Push or poll transport.
    pub edge_type: EdgeType,
    /// Lifecycle state.
    pub status: EdgeStatus,
    /// RID type prefixes subscribed to.
    #[serde(default)]
    pub rid_types: Vec<String>,
}

/// Derives the RID of the edge between `source` and `target`.
///
/// Both endpoints derive the same RID independently, so an approval
/// UPDATE lands on the same object as the original proposal. Direction
/// matters: the hash covers source-then-target.
pub fn edge_rid(source: &Rid, target: &Rid) -> Rid {
    let combined = format!("{}{}", source.as_str(), target.as_str());
    Rid::new(format!("{}:{}", Rid::EDGE_PREFIX, sha256_hex(&combined)))
}

/// Bundles an edge profile under its derived RID.
pub fn generate_edge_bundle(profile: &EdgeProfile) -> Result<Bundle> {
    let rid = edge_rid(&profile.source, &profile.target);
    let contents = serde_json::to_value(profile).map_err(|e| {
        koinet_types::KoiNetError::ProtocolError {
            reason: format!("failed to serialize edge profile: {e}"),
        }
    })?;
    Bundle::generate(rid, contents)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
