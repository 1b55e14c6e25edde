//! Periodic inbound polling of peers we subscribe to.

use std::sync::Arc;
use std::time::Duration;

use koinet_protocol::{EdgeStatus, EdgeType, NodeProfile, NodeType};
use koinet_storage::Cache;
use koinet_types::config::FirstContact;
use koinet_types::{Result, Rid};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::identity::NodeIdentity;
use crate::knowledge::{KnowledgeObject, KnowledgeSource};
use crate::network::graph::{Direction, NetworkGraph};
use crate::network::request::RequestHandler;
use crate::pipeline::KnowledgePipeline;

/// Drives periodic `pollEvents` sweeps against poll-edge sources.
pub struct NodePoller {
    identity: Arc<NodeIdentity>,
    cache: Arc<dyn Cache>,
    graph: Arc<NetworkGraph>,
    pipeline: Arc<KnowledgePipeline>,
    requests: Arc<RequestHandler>,
    first_contact: FirstContact,
    interval: Duration,
}

impl NodePoller {
    /// Creates the poller.
    pub fn new(
        identity: Arc<NodeIdentity>,
        cache: Arc<dyn Cache>,
        graph: Arc<NetworkGraph>,
        pipeline: Arc<KnowledgePipeline>,
        requests: Arc<RequestHandler>,
        first_contact: FirstContact,
        interval_secs: u64,
    ) -> Self {
        Self {
            identity,
            cache,
            graph,
            pipeline,
            requests,
            first_contact,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Spawns the polling loop; flips of the watch channel stop it.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup and
            // handshake finish before the first sweep.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "poll sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("poller shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Peers whose events we poll: sources of approved POLL edges
    /// pointing at us, restricted to reachable FULL nodes. Falls back
    /// to the first contact when there are none.
    fn poll_targets(&self) -> Result<Vec<Rid>> {
        let mut targets = Vec::new();
        for peer in self
            .graph
            .neighbors(Direction::In, Some(EdgeStatus::Approved), None)
        {
            let Some(edge) = self.graph.edge_between(&peer, self.identity.rid()) else {
                continue;
            };
            if edge.edge_type != EdgeType::Poll {
                continue;
            }
            let Some(bundle) = self.cache.read(&peer)? else {
                continue;
            };
            let Ok(profile) = bundle.validate_contents::<NodeProfile>() else {
                continue;
            };
            if profile.node_type == NodeType::Full {
                targets.push(peer);
            }
        }
        if targets.is_empty() {
            if let Some(contact) = self.first_contact.rid.clone() {
                targets.push(contact);
            }
        }
        Ok(targets)
    }

    /// One sweep: poll every target, feed the events into the pipeline
    /// tagged with their source peer, then drain once.
    pub async fn sweep(&self) -> Result<()> {
        let targets = self.poll_targets()?;
        for peer in targets {
            match self.requests.poll_events(&peer, 0).await {
                Ok(events) => {
                    debug!(%peer, count = events.len(), "polled events");
                    for event in events {
                        self.pipeline.enqueue(KnowledgeObject::from_event(
                            event,
                            KnowledgeSource::External(peer.clone()),
                        ));
                    }
                }
                Err(e) => debug!(%peer, error = %e, "poll failed"),
            }
        }
        self.pipeline.drain().await
    }
}
