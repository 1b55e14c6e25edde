//! Request and response models for the five RPC endpoints.
//!
//! Every endpoint takes a POST with a [`SignedEnvelope`](crate::envelope::SignedEnvelope)
//! body whose payload is one of the request models here, and answers
//! with an envelope wrapping the matching response model. Rejections
//! skip the envelope and return a bare [`ErrorResponse`] with a non-200
//! status.

use koinet_types::{KoiNetError, Rid};
use serde::{Deserialize, Serialize};

use crate::bundle::{Bundle, Manifest};
use crate::event::Event;

// ---------------------------------------------------------------------------
// Endpoint paths
// ---------------------------------------------------------------------------

/// Push events to a peer.
pub const BROADCAST_EVENTS_PATH: &str = "/events/broadcast";
/// Drain events queued for the caller.
pub const POLL_EVENTS_PATH: &str = "/events/poll";
/// List cached RIDs by type.
pub const FETCH_RIDS_PATH: &str = "/rids/fetch";
/// Fetch manifests for specific RIDs.
pub const FETCH_MANIFESTS_PATH: &str = "/manifests/fetch";
/// Fetch full bundles for specific RIDs.
pub const FETCH_BUNDLES_PATH: &str = "/bundles/fetch";

// ---------------------------------------------------------------------------
// Request models
// ---------------------------------------------------------------------------

/// Body of `/events/broadcast`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsPayload {
    /// Events in propagation order.
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Body of `/events/poll`: drain events queued for `rid`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollEvents {
    /// The polling node (whose mailbox to drain).
    pub rid: Rid,
    /// Maximum number of events to return; 0 means no limit.
    #[serde(default)]
    pub limit: usize,
}

/// Body of `/rids/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRids {
    /// Type prefixes to filter by; empty means all.
    #[serde(default)]
    pub rid_types: Vec<String>,
}

/// Body of `/manifests/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchManifests {
    /// Type prefixes to filter by; empty means no prefix filter.
    #[serde(default)]
    pub rid_types: Vec<String>,
    /// Specific RIDs to fetch; empty means all matching the prefixes.
    #[serde(default)]
    pub rids: Vec<Rid>,
}

/// Body of `/bundles/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchBundles {
    /// Specific RIDs to fetch.
    #[serde(default)]
    pub rids: Vec<Rid>,
}

// ---------------------------------------------------------------------------
// Response models
// ---------------------------------------------------------------------------

/// Response to `/rids/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RidsPayload {
    /// Matching cached RIDs.
    #[serde(default)]
    pub rids: Vec<Rid>,
}

/// Response to `/manifests/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestsPayload {
    /// Manifests found in the cache.
    #[serde(default)]
    pub manifests: Vec<Manifest>,
    /// Requested RIDs with no cached manifest.
    #[serde(default)]
    pub not_found: Vec<Rid>,
}

/// Response to `/bundles/fetch`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BundlesPayload {
    /// Bundles found in the cache.
    #[serde(default)]
    pub bundles: Vec<Bundle>,
    /// Requested RIDs with no cached bundle.
    #[serde(default)]
    pub not_found: Vec<Rid>,
    /// Requested RIDs the server knows of but cannot serve yet.
    #[serde(default)]
    pub deferred: Vec<Rid>,
}

// ---------------------------------------------------------------------------
// Wire errors
// ---------------------------------------------------------------------------

/// The typed error names peers receive on rejected requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    /// The sender's identity could not be resolved.
    UnknownNode,
    /// The sender's RID does not match its public key.
    InvalidKey,
    /// The envelope signature did not verify.
    InvalidSignature,
    /// The envelope was addressed to a different node.
    InvalidTarget,
}

/// Bare JSON error body returned with a non-200 status.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Which validation step rejected the request.
    pub error: WireErrorKind,
}

impl ErrorResponse {
    /// Maps a node-local error onto the wire error model, if it has a
    /// wire representation.
    pub fn from_error(err: &KoiNetError) -> Option<Self> {
        let error = match err {
            KoiNetError::UnknownNode { .. } => WireErrorKind::UnknownNode,
            KoiNetError::InvalidKey { .. } => WireErrorKind::InvalidKey,
            KoiNetError::InvalidSignature { .. } => WireErrorKind::InvalidSignature,
            KoiNetError::InvalidTarget { .. } => WireErrorKind::InvalidTarget,
            _ => return None,
        };
        Some(Self { error })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
