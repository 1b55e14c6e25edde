//! Integration tests for node startup and the bootstrap handshake.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use koinet_node::{EventTransport, KoiNode, KoiNodeBuilder, NodeConfig};
use koinet_protocol::edge::generate_edge_bundle;
use koinet_protocol::{EdgeProfile, EdgeStatus, EdgeType, Event, EventType};
use koinet_storage::MemoryCache;
use koinet_types::config::{FirstContact, NodeSettings};
use koinet_types::{Result, Rid};

struct RecordingTransport {
    sent: Mutex<Vec<(Rid, Vec<Event>)>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(Rid, Vec<Event>)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl EventTransport for RecordingTransport {
    async fn broadcast(&self, target: &Rid, events: Vec<Event>) -> Result<()> {
        if let Ok(mut guard) = self.sent.lock() {
            guard.push((target.clone(), events));
        }
        Ok(())
    }
}

fn contact_rid() -> Rid {
    Rid::new("orn:koi-net.node:hub+aa")
}

fn build_node(name: &str, first_contact: FirstContact) -> (KoiNode, Arc<RecordingTransport>) {
    let config = NodeConfig {
        settings: NodeSettings {
            node_name: name.into(),
            first_contact,
            ..NodeSettings::default()
        },
        ..NodeConfig::default()
    };
    let transport = RecordingTransport::new();
    let node = match KoiNodeBuilder::new(config)
        .cache(Arc::new(MemoryCache::new()))
        .transport(transport.clone())
        .build()
    {
        Ok(node) => node,
        Err(e) => panic!("failed to build node: {e}"),
    };
    (node, transport)
}

fn hub_contact() -> FirstContact {
    FirstContact {
        rid: Some(contact_rid()),
        url: Some("http://hub.example:8351".into()),
    }
}

#[tokio::test]
async fn startup_caches_own_profile() -> Result<()> {
    let (node, _transport) = build_node("alpha", FirstContact::default());
    node.start().await?;

    let me = node.identity.rid();
    let cached = match node.cache.read(me)? {
        Some(bundle) => bundle,
        None => panic!("own profile missing from cache after startup"),
    };
    let expected = match serde_json::to_value(node.identity.profile()) {
        Ok(v) => v,
        Err(e) => panic!("profile json: {e}"),
    };
    assert_eq!(cached.contents, expected);
    Ok(())
}

#[tokio::test]
async fn isolated_node_handshakes_with_first_contact() -> Result<()> {
    let (node, transport) = build_node("alpha", hub_contact());
    node.start().await?;

    // One broadcast: FORGET(self) clearing stale state, then NEW(self)
    // carrying the full profile bundle.
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, contact_rid());
    let events = &sent[0].1;
    assert_eq!(events.len(), 2);

    let me = node.identity.rid();
    assert_eq!(events[0].event_type, EventType::Forget);
    assert_eq!(events[0].rid, *me);
    assert!(events[0].manifest.is_none());

    assert_eq!(events[1].event_type, EventType::New);
    assert_eq!(events[1].rid, *me);
    assert!(events[1].manifest.is_some());
    assert!(events[1].contents.is_some());
    Ok(())
}

#[tokio::test]
async fn connected_node_does_not_handshake() -> Result<()> {
    let (node, transport) = build_node("alpha", hub_contact());

    // An existing edge means the node is already part of a network.
    let edge = EdgeProfile {
        source: node.identity.rid().clone(),
        target: contact_rid(),
        edge_type: EdgeType::Poll,
        status: EdgeStatus::Approved,
        rid_types: vec!["orn:unrelated".into()],
    };
    node.cache.write(&generate_edge_bundle(&edge)?)?;

    node.start().await?;
    assert!(transport.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn no_contact_configured_stays_quiet() -> Result<()> {
    let (node, transport) = build_node("alpha", FirstContact::default());
    node.start().await?;
    assert!(transport.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn startup_is_idempotent() -> Result<()> {
    let (node, transport) = build_node("alpha", hub_contact());
    node.start().await?;
    node.start().await?;

    // The second start re-announces (the profile is unchanged, so the
    // pipeline treats it as a duplicate) but the handshake repeats: the
    // node still has no edges.
    assert_eq!(transport.sent().len(), 2);
    let me = node.identity.rid();
    assert_eq!(node.cache.read(me)?.map(|b| b.rid().clone()), Some(me.clone()));
    Ok(())
}
