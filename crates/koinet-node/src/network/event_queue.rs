//! Outbound event queue: one mailbox per destination peer.
//!
//! Events for peers that poll us wait in a poll mailbox until the peer
//! drains it. Events for pushable peers collect in a broadcast mailbox
//! and are flushed as one signed RPC. Delivery is at-least-once: a
//! failed flush requeues the drained events at the front.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use koinet_protocol::{EdgeStatus, EdgeType, Event, NodeType};
use koinet_types::config::FirstContact;
use koinet_types::{KoiNetError, Result, Rid};
use tracing::{debug, error, warn};

use crate::effector::{DerefOptions, Effector};
use crate::network::graph::NetworkGraph;

/// Sends one broadcast RPC to a peer. Implemented by the request
/// handler; tests inject a recording implementation.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Delivers `events` to `target` in order.
    async fn broadcast(&self, target: &Rid, events: Vec<Event>) -> Result<()>;
}

#[derive(Default)]
struct Mailbox {
    events: VecDeque<Event>,
    failures: u32,
}

/// Per-peer outbound mailboxes with bounded capacity and flush retry.
pub struct NetworkEventQueue {
    me: Rid,
    effector: Arc<Effector>,
    graph: Arc<NetworkGraph>,
    first_contact: FirstContact,
    transport: Arc<dyn EventTransport>,
    capacity: usize,
    retry_max: u32,
    broadcast_boxes: Mutex<HashMap<Rid, Mailbox>>,
    poll_boxes: Mutex<HashMap<Rid, VecDeque<Event>>>,
}

fn poisoned() -> KoiNetError {
    KoiNetError::NetworkError {
        reason: "event queue lock poisoned".into(),
    }
}

fn push_capped(events: &mut VecDeque<Event>, event: Event, capacity: usize, target: &Rid) {
    if events.len() >= capacity {
        warn!(%target, "mailbox full, dropping oldest event");
        events.pop_front();
    }
    events.push_back(event);
}

impl NetworkEventQueue {
    /// Creates an empty queue.
    pub fn new(
        me: Rid,
        effector: Arc<Effector>,
        graph: Arc<NetworkGraph>,
        first_contact: FirstContact,
        transport: Arc<dyn EventTransport>,
        capacity: usize,
        retry_max: u32,
    ) -> Self {
        Self {
            me,
            effector,
            graph,
            first_contact,
            transport,
            capacity,
            retry_max,
            broadcast_boxes: Mutex::new(HashMap::new()),
            poll_boxes: Mutex::new(HashMap::new()),
        }
    }

    fn is_first_contact(&self, target: &Rid) -> bool {
        self.first_contact.rid.as_ref() == Some(target)
    }

    /// Queues an event for `target`, routing by edge type and profile.
    ///
    /// A POLL edge from us to the target parks the event in the poll
    /// mailbox the peer drains. Otherwise the target must be a known
    /// FULL node or the configured first contact; anything else is
    /// dropped with a warning (not an error — fan-out must not fail the
    /// pipeline pass).
    pub async fn push(&self, event: Event, target: &Rid, flush: bool) -> Result<()> {
        if let Some(edge) = self.graph.edge_between(&self.me, target) {
            if edge.edge_type == EdgeType::Poll && edge.status == EdgeStatus::Approved {
                let mut boxes = self.poll_boxes.lock().map_err(|_| poisoned())?;
                let events = boxes.entry(target.clone()).or_default();
                push_capped(events, event, self.capacity, target);
                debug!(%target, "event parked for poll");
                return Ok(());
            }
        }

        let pushable = match self
            .effector
            .dereference_with(target, DerefOptions::local_only())
            .await?
        {
            Some(bundle) => bundle
                .validate_contents::<koinet_protocol::NodeProfile>()
                .map(|p| p.node_type == NodeType::Full && p.base_url.is_some())
                .unwrap_or(false),
            None => false,
        };

        if !pushable && !self.is_first_contact(target) {
            warn!(%target, "dropping event for unknown or unpushable peer");
            return Ok(());
        }

        {
            let mut boxes = self.broadcast_boxes.lock().map_err(|_| poisoned())?;
            let mailbox = boxes.entry(target.clone()).or_default();
            push_capped(&mut mailbox.events, event, self.capacity, target);
        }
        if flush {
            self.flush(target).await?;
        }
        Ok(())
    }

    /// Flushes the broadcast mailbox for `target` as one RPC.
    ///
    /// On transport failure the drained events are requeued at the
    /// front; after `retry_max` consecutive failures the mailbox is
    /// dropped entirely. Flush failures are absorbed, never propagated.
    pub async fn flush(&self, target: &Rid) -> Result<()> {
        let drained: Vec<Event> = {
            let mut boxes = self.broadcast_boxes.lock().map_err(|_| poisoned())?;
            match boxes.get_mut(target) {
                Some(mailbox) => mailbox.events.drain(..).collect(),
                None => return Ok(()),
            }
        };
        if drained.is_empty() {
            return Ok(());
        }

        match self.transport.broadcast(target, drained.clone()).await {
            Ok(()) => {
                let mut boxes = self.broadcast_boxes.lock().map_err(|_| poisoned())?;
                if let Some(mailbox) = boxes.get_mut(target) {
                    mailbox.failures = 0;
                }
                debug!(%target, count = drained.len(), "flushed events");
                Ok(())
            }
            Err(e) => {
                let mut boxes = self.broadcast_boxes.lock().map_err(|_| poisoned())?;
                let Some(mailbox) = boxes.get_mut(target) else {
                    return Ok(());
                };
                mailbox.failures += 1;
                if mailbox.failures >= self.retry_max {
                    error!(%target, failures = mailbox.failures, error = %e,
                        "flush retry cap reached, dropping mailbox");
                    boxes.remove(target);
                } else {
                    warn!(%target, error = %e, "flush failed, requeueing events");
                    for event in drained.into_iter().rev() {
                        mailbox.events.push_front(event);
                    }
                }
                Ok(())
            }
        }
    }

    /// Flushes every broadcast mailbox.
    pub async fn flush_all(&self) -> Result<()> {
        let targets: Vec<Rid> = {
            let boxes = self.broadcast_boxes.lock().map_err(|_| poisoned())?;
            boxes.keys().cloned().collect()
        };
        for target in targets {
            self.flush(&target).await?;
        }
        Ok(())
    }

    /// Drains up to `limit` events parked for a polling peer; 0 = all.
    pub fn drain_poll(&self, rid: &Rid, limit: usize) -> Vec<Event> {
        let Ok(mut boxes) = self.poll_boxes.lock() else {
            return Vec::new();
        };
        let Some(events) = boxes.get_mut(rid) else {
            return Vec::new();
        };
        let take = if limit == 0 || limit > events.len() {
            events.len()
        } else {
            limit
        };
        events.drain(..take).collect()
    }

    /// Snapshot of events parked for a polling peer, without draining.
    pub fn pending_poll(&self, rid: &Rid) -> Vec<Event> {
        self.poll_boxes
            .lock()
            .ok()
            .and_then(|boxes| boxes.get(rid).map(|q| q.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Snapshot of the broadcast mailbox for a peer, without draining.
    pub fn pending_broadcast(&self, target: &Rid) -> Vec<Event> {
        self.broadcast_boxes
            .lock()
            .ok()
            .and_then(|boxes| boxes.get(target).map(|m| m.events.iter().cloned().collect()))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_protocol::edge::generate_edge_bundle;
    use koinet_protocol::{
        Bundle, EdgeProfile, EventType, NodeProfile, NodeProvides,
    };
    use koinet_storage::{Cache, MemoryCache};
    use crate::pipeline::KnowledgeQueue;

    struct RecordingTransport {
        sent: Mutex<Vec<(Rid, Vec<Event>)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: std::sync::atomic::AtomicBool::new(false),
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
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(KoiNetError::UnreachablePeer {
                    reason: "injected".into(),
                });
            }
            if let Ok(mut guard) = self.sent.lock() {
                guard.push((target.clone(), events));
            }
            Ok(())
        }
    }

    fn me() -> Rid {
        Rid::new("orn:koi-net.node:me+aa")
    }

    fn peer() -> Rid {
        Rid::new("orn:koi-net.node:peer+bb")
    }

    fn event(rid: &str) -> Event {
        Event::from_rid(EventType::New, Rid::new(rid))
    }

    fn full_profile_bundle(rid: &Rid) -> Bundle {
        let profile = NodeProfile {
            base_url: Some("http://peer.example:8351".into()),
            node_type: NodeType::Full,
            provides: NodeProvides::default(),
            public_key: "cGs=".into(),
        };
        let contents = match serde_json::to_value(&profile) {
            Ok(v) => v,
            Err(e) => panic!("profile json: {e}"),
        };
        match Bundle::generate(rid.clone(), contents) {
            Ok(b) => b,
            Err(e) => panic!("bundle: {e}"),
        }
    }

    struct Fixture {
        cache: Arc<MemoryCache>,
        graph: Arc<NetworkGraph>,
        transport: Arc<RecordingTransport>,
        queue: NetworkEventQueue,
    }

    fn fixture(first_contact: FirstContact, capacity: usize, retry_max: u32) -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let kqueue = Arc::new(KnowledgeQueue::new());
        let graph = Arc::new(NetworkGraph::new(me(), cache.clone()));
        let effector = Arc::new(Effector::new(me(), cache.clone(), kqueue));
        let transport = RecordingTransport::new();
        let queue = NetworkEventQueue::new(
            me(),
            effector,
            graph.clone(),
            first_contact,
            transport.clone(),
            capacity,
            retry_max,
        );
        Fixture {
            cache,
            graph,
            transport,
            queue,
        }
    }

    #[tokio::test]
    async fn unknown_target_is_dropped_silently() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 3);
        f.queue.push(event("orn:test:1"), &peer(), true).await?;
        assert!(f.transport.sent().is_empty());
        assert!(f.queue.pending_broadcast(&peer()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn full_peer_gets_broadcast_on_flush() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 3);
        f.cache.write(&full_profile_bundle(&peer()))?;
        f.queue.push(event("orn:test:1"), &peer(), false).await?;
        f.queue.push(event("orn:test:2"), &peer(), true).await?;
        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, peer());
        assert_eq!(sent[0].1.len(), 2);
        assert!(f.queue.pending_broadcast(&peer()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn first_contact_is_pushable_without_profile() -> Result<()> {
        let fc = FirstContact {
            rid: Some(peer()),
            url: Some("http://peer.example:8351".into()),
        };
        let f = fixture(fc, 8, 3);
        f.queue.push(event("orn:test:1"), &peer(), true).await?;
        assert_eq!(f.transport.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn poll_edge_parks_events_until_drained() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 3);
        let profile = EdgeProfile {
            source: me(),
            target: peer(),
            edge_type: EdgeType::Poll,
            status: EdgeStatus::Approved,
            rid_types: vec!["orn:test".into()],
        };
        f.cache.write(&generate_edge_bundle(&profile)?)?;
        f.graph.rebuild()?;

        f.queue.push(event("orn:test:1"), &peer(), true).await?;
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.queue.pending_poll(&peer()).len(), 1);

        let drained = f.queue.drain_poll(&peer(), 0);
        assert_eq!(drained.len(), 1);
        assert!(f.queue.pending_poll(&peer()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn drain_poll_respects_limit() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 3);
        let profile = EdgeProfile {
            source: me(),
            target: peer(),
            edge_type: EdgeType::Poll,
            status: EdgeStatus::Approved,
            rid_types: vec![],
        };
        f.cache.write(&generate_edge_bundle(&profile)?)?;
        f.graph.rebuild()?;
        for i in 0..3 {
            f.queue
                .push(event(&format!("orn:test:{i}")), &peer(), false)
                .await?;
        }
        assert_eq!(f.queue.drain_poll(&peer(), 2).len(), 2);
        assert_eq!(f.queue.pending_poll(&peer()).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn overflow_drops_oldest() -> Result<()> {
        let f = fixture(FirstContact::default(), 2, 3);
        f.cache.write(&full_profile_bundle(&peer()))?;
        for i in 0..3 {
            f.queue
                .push(event(&format!("orn:test:{i}")), &peer(), false)
                .await?;
        }
        let pending = f.queue.pending_broadcast(&peer());
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].rid.as_str(), "orn:test:1");
        Ok(())
    }

    #[tokio::test]
    async fn failed_flush_requeues_in_order() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 3);
        f.cache.write(&full_profile_bundle(&peer()))?;
        f.queue.push(event("orn:test:1"), &peer(), false).await?;
        f.queue.push(event("orn:test:2"), &peer(), false).await?;

        f.transport.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        f.queue.flush(&peer()).await?;
        let pending = f.queue.pending_broadcast(&peer());
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].rid.as_str(), "orn:test:1");

        f.transport.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        f.queue.flush(&peer()).await?;
        assert_eq!(f.transport.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn retry_cap_drops_mailbox() -> Result<()> {
        let f = fixture(FirstContact::default(), 8, 2);
        f.cache.write(&full_profile_bundle(&peer()))?;
        f.queue.push(event("orn:test:1"), &peer(), false).await?;
        f.transport.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        f.queue.flush(&peer()).await?;
        f.queue.flush(&peer()).await?;
        assert!(f.queue.pending_broadcast(&peer()).is_empty());
        Ok(())
    }
}
