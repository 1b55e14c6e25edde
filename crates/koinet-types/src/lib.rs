//! Core shared types for the KOI-net knowledge distribution node.
//!
//! This crate defines the fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

pub mod config;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Rid
// ---------------------------------------------------------------------------

/// Resource Identifier: an opaque, namespaced string naming a knowledge
/// object (e.g. `orn:koi-net.node:alpha+3f2a...`).
///
/// Type membership is expressed purely through string prefixes — an RID
/// "is" a node RID iff it starts with [`Rid::NODE_PREFIX`]. RIDs are
/// immutable once assigned.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rid(String);

impl Rid {
    /// Prefix of node-typed RIDs.
    pub const NODE_PREFIX: &'static str = "orn:koi-net.node";

    /// Prefix of edge-typed RIDs.
    pub const EDGE_PREFIX: &'static str = "orn:koi-net.edge";

    /// Creates an RID from any string-like value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the RID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tests type membership by string-prefix match.
    pub fn has_type(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// True if this is a node-typed RID.
    pub fn is_node(&self) -> bool {
        self.has_type(Self::NODE_PREFIX)
    }

    /// True if this is an edge-typed RID.
    pub fn is_edge(&self) -> bool {
        self.has_type(Self::EDGE_PREFIX)
    }

    /// True if this RID participates in the network topology (node or edge).
    pub fn is_topology(&self) -> bool {
        self.is_node() || self.is_edge()
    }

    /// Returns the type prefix of this RID: the `orn:<namespace>` head,
    /// i.e. everything up to (but excluding) the second `:`.
    ///
    /// `orn:koi-net.node:alpha+3f2a` → `orn:koi-net.node`. RIDs with fewer
    /// than two separators return the whole string.
    pub fn type_prefix(&self) -> &str {
        let mut colons = 0;
        for (i, b) in self.0.bytes().enumerate() {
            if b == b':' {
                colons += 1;
                if colons == 2 {
                    return &self.0[..i];
                }
            }
        }
        &self.0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Rid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Rid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Rid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// UTC timestamp in RFC 3339 form on the wire.
///
/// Manifest version ordering is last-write-wins by timestamp, so
/// timestamps are totally ordered. All nodes use UTC to keep ordering
/// deterministic across timezones.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a `Timestamp` representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a `Timestamp` from a `DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// KoiNetError
// ---------------------------------------------------------------------------

/// Central error type for the KOI-net node.
///
/// All crates in the workspace convert their internal errors into variants
/// of this enum. The first four variants map one-to-one onto the wire
/// error model returned to peers; the rest are node-local.
///
/// Stale or duplicate facts and missing fetch sources are pipeline control
/// flow (stop-chain / silent abort), never errors.
#[derive(Debug, Error)]
pub enum KoiNetError {
    /// A peer's identity/profile could not be resolved.
    #[error("unknown node: {rid}")]
    UnknownNode {
        /// RID of the unresolvable node.
        rid: String,
    },

    /// A node RID does not match the hash of its profile's public key.
    #[error("invalid key binding for {rid}")]
    InvalidKey {
        /// RID whose key binding failed.
        rid: String,
    },

    /// An envelope signature failed cryptographic verification.
    #[error("invalid signature: {reason}")]
    InvalidSignature {
        /// Human-readable description of the verification failure.
        reason: String,
    },

    /// An envelope was not addressed to this node.
    #[error("invalid envelope target: {target}")]
    InvalidTarget {
        /// The target RID the envelope actually carried.
        target: String,
    },

    /// A transport failure while contacting a peer. Flush failures with
    /// this cause trigger a requeue rather than propagating to callers.
    #[error("unreachable peer: {reason}")]
    UnreachablePeer {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// A cryptographic operation failed (key parsing, signing).
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// A cache/storage operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A networking failure outside the typed wire errors.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A protocol-level error (serialization, schema, canonical form).
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

/// Convenience result type using [`KoiNetError`].
pub type Result<T> = std::result::Result<T, KoiNetError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rid_prefix_membership() {
        let rid = Rid::new("orn:koi-net.node:alpha+3f2a");
        assert!(rid.is_node());
        assert!(!rid.is_edge());
        assert!(rid.is_topology());
        assert!(rid.has_type("orn:koi-net.node"));
    }

    #[test]
    fn rid_type_prefix_two_segments() {
        let rid = Rid::new("orn:koi-net.node:alpha+3f2a");
        assert_eq!(rid.type_prefix(), "orn:koi-net.node");
    }

    #[test]
    fn rid_type_prefix_embedded_colons_in_reference() {
        let rid = Rid::new("orn:slack.message:T123:C456:789");
        assert_eq!(rid.type_prefix(), "orn:slack.message");
    }

    #[test]
    fn rid_type_prefix_short_rid_is_whole_string() {
        let rid = Rid::new("orn:thing");
        assert_eq!(rid.type_prefix(), "orn:thing");
    }

    #[test]
    fn rid_serde_is_transparent() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let rid = Rid::new("orn:test:1");
        let json = serde_json::to_string(&rid)?;
        assert_eq!(json, "\"orn:test:1\"");
        let parsed: Rid = serde_json::from_str(&json)?;
        assert_eq!(rid, parsed);
        Ok(())
    }

    #[test]
    fn timestamp_ordering() {
        let older = Timestamp::from_datetime(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).single().unwrap_or_else(Utc::now),
        );
        let newer = Timestamp::from_datetime(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 1).single().unwrap_or_else(Utc::now),
        );
        assert!(newer > older);
        assert!(older <= older.clone());
    }

    #[test]
    fn timestamp_serde_rfc3339() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ts = Timestamp::from_datetime(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).single().unwrap_or_else(Utc::now),
        );
        let json = serde_json::to_string(&ts)?;
        assert!(json.contains("2025-06-15T12:00:00"));
        let parsed: Timestamp = serde_json::from_str(&json)?;
        assert_eq!(ts, parsed);
        Ok(())
    }

    #[test]
    fn error_display() {
        let err = KoiNetError::InvalidTarget {
            target: "orn:koi-net.node:other+ff".into(),
        };
        assert!(err.to_string().contains("orn:koi-net.node:other+ff"));
    }
}
