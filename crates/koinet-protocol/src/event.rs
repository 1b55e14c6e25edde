//! Change events: the unit of knowledge propagation between nodes.

use koinet_types::{Rid, Timestamp};
use serde::{Deserialize, Serialize};

use crate::bundle::{Bundle, Manifest};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Kind of change an event announces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// The sender believes the receiver has not seen this object.
    New,
    /// The sender believes the receiver already knows this object.
    Update,
    /// The object has been deleted; receivers should drop their copy.
    Forget,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::New => write!(f, "NEW"),
            EventType::Update => write!(f, "UPDATE"),
            EventType::Forget => write!(f, "FORGET"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An announcement that knowledge changed.
///
/// The NEW/UPDATE distinction is advisory: it reflects the sender's
/// belief about the receiver's state, and receivers resolve the truth
/// against their own cache. Manifest and contents are optional; a bare
/// RID forces the receiver to fetch what it needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RID of the object that changed.
    pub rid: Rid,
    /// What kind of change this is.
    pub event_type: EventType,
    /// Version metadata, if the sender chose to include it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    /// Object contents, if the sender chose to include them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<serde_json::Value>,
}

impl Event {
    /// Builds an event carrying only an RID.
    pub fn from_rid(event_type: EventType, rid: Rid) -> Self {
        Self {
            rid,
            event_type,
            manifest: None,
            contents: None,
        }
    }

    /// Builds an event carrying an RID and manifest but no contents.
    pub fn from_manifest(event_type: EventType, manifest: Manifest) -> Self {
        Self {
            rid: manifest.rid.clone(),
            event_type,
            manifest: Some(manifest),
            contents: None,
        }
    }

    /// Builds a full event carrying manifest and contents.
    pub fn from_bundle(event_type: EventType, bundle: Bundle) -> Self {
        Self {
            rid: bundle.manifest.rid.clone(),
            event_type,
            manifest: Some(bundle.manifest),
            contents: Some(bundle.contents),
        }
    }

    /// Reassembles the bundle if both manifest and contents are present.
    pub fn bundle(&self) -> Option<Bundle> {
        match (&self.manifest, &self.contents) {
            (Some(manifest), Some(contents)) => Some(Bundle {
                manifest: manifest.clone(),
                contents: contents.clone(),
            }),
            _ => None,
        }
    }

    /// Timestamp of the carried manifest, if any.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.manifest.as_ref().map(|m| &m.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
