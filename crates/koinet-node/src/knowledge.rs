//! The knowledge object: one fact in flight through the pipeline.

use std::collections::BTreeSet;

use koinet_protocol::{Bundle, Event, EventType, Manifest};
use koinet_types::Rid;
use serde_json::Value;

// ---------------------------------------------------------------------------
// KnowledgeSource
// ---------------------------------------------------------------------------

/// Where a knowledge object came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KnowledgeSource {
    /// Produced by this node (self-announcement, approval, cascade).
    Internal,
    /// Received from the named peer; missing parts can be fetched there.
    External(Rid),
}

impl KnowledgeSource {
    /// The originating peer, if external.
    pub fn peer(&self) -> Option<&Rid> {
        match self {
            KnowledgeSource::Internal => None,
            KnowledgeSource::External(rid) => Some(rid),
        }
    }
}

// ---------------------------------------------------------------------------
// KnowledgeObject
// ---------------------------------------------------------------------------

/// Ephemeral carrier threaded through one pipeline pass.
///
/// `event_type` is what the sender claimed; `normalized_type` is what
/// this node decided after comparing against its cache. Only the
/// normalized type drives cache mutation and fan-out. Never persisted.
#[derive(Clone, Debug)]
pub struct KnowledgeObject {
    /// RID of the fact.
    pub rid: Rid,
    /// Version metadata, if known yet.
    pub manifest: Option<Manifest>,
    /// Contents, if known yet.
    pub contents: Option<Value>,
    /// Event type as received (sender's belief).
    pub event_type: Option<EventType>,
    /// Event type as decided by this node's pipeline.
    pub normalized_type: Option<EventType>,
    /// Origin of the fact.
    pub source: KnowledgeSource,
    /// Peers the normalized event will be queued for. Deduplicated.
    pub network_targets: BTreeSet<Rid>,
}

impl KnowledgeObject {
    /// A bare RID; manifest and contents must be fetched or looked up.
    pub fn from_rid(rid: Rid, source: KnowledgeSource) -> Self {
        Self {
            rid,
            manifest: None,
            contents: None,
            event_type: None,
            normalized_type: None,
            source,
            network_targets: BTreeSet::new(),
        }
    }

    /// A manifest without contents.
    pub fn from_manifest(manifest: Manifest, source: KnowledgeSource) -> Self {
        Self {
            rid: manifest.rid.clone(),
            manifest: Some(manifest),
            contents: None,
            event_type: None,
            normalized_type: None,
            source,
            network_targets: BTreeSet::new(),
        }
    }

    /// A complete bundle.
    pub fn from_bundle(bundle: Bundle, source: KnowledgeSource) -> Self {
        Self {
            rid: bundle.manifest.rid.clone(),
            manifest: Some(bundle.manifest),
            contents: Some(bundle.contents),
            event_type: None,
            normalized_type: None,
            source,
            network_targets: BTreeSet::new(),
        }
    }

    /// A wire event, carrying whatever the sender included.
    pub fn from_event(event: Event, source: KnowledgeSource) -> Self {
        Self {
            rid: event.rid,
            manifest: event.manifest,
            contents: event.contents,
            event_type: Some(event.event_type),
            normalized_type: None,
            source,
            network_targets: BTreeSet::new(),
        }
    }

    /// Sets the incoming event type, builder style.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Reassembles the bundle if manifest and contents are both present.
    pub fn bundle(&self) -> Option<Bundle> {
        match (&self.manifest, &self.contents) {
            (Some(manifest), Some(contents)) => Some(Bundle {
                manifest: manifest.clone(),
                contents: contents.clone(),
            }),
            _ => None,
        }
    }

    /// The event this node will propagate, per the normalized type.
    ///
    /// FORGET carries no payload; NEW/UPDATE require a full bundle.
    pub fn normalized_event(&self) -> Option<Event> {
        match self.normalized_type {
            Some(EventType::Forget) => {
                Some(Event::from_rid(EventType::Forget, self.rid.clone()))
            }
            Some(t) => self.bundle().map(|b| Event::from_bundle(t, b)),
            None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_types::Result;
    use serde_json::json;

    #[test]
    fn from_event_preserves_payload() -> Result<()> {
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"v": 1}))?;
        let event = Event::from_bundle(EventType::New, bundle.clone());
        let kobj = KnowledgeObject::from_event(event, KnowledgeSource::Internal);
        assert_eq!(kobj.event_type, Some(EventType::New));
        assert_eq!(kobj.bundle(), Some(bundle));
        Ok(())
    }

    #[test]
    fn normalized_forget_event_is_bare() -> Result<()> {
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"v": 1}))?;
        let mut kobj = KnowledgeObject::from_bundle(bundle, KnowledgeSource::Internal);
        kobj.normalized_type = Some(EventType::Forget);
        let event = match kobj.normalized_event() {
            Some(e) => e,
            None => panic!("expected an event"),
        };
        assert_eq!(event.event_type, EventType::Forget);
        assert!(event.manifest.is_none() && event.contents.is_none());
        Ok(())
    }

    #[test]
    fn no_normalized_type_means_no_event() {
        let kobj = KnowledgeObject::from_rid(Rid::new("orn:test:1"), KnowledgeSource::Internal);
        assert!(kobj.normalized_event().is_none());
    }

    #[test]
    fn normalized_update_without_contents_yields_nothing() -> Result<()> {
        let bundle = Bundle::generate(Rid::new("orn:test:1"), json!({"v": 1}))?;
        let mut kobj =
            KnowledgeObject::from_manifest(bundle.manifest, KnowledgeSource::Internal);
        kobj.normalized_type = Some(EventType::Update);
        assert!(kobj.normalized_event().is_none());
        Ok(())
    }
}
