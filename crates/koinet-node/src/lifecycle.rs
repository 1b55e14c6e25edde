//! Node startup: seed the cache with our own profile and, when the
//! graph is empty, announce ourselves to the first contact.

use std::sync::Arc;

use koinet_protocol::{Event, EventType};
use koinet_types::config::FirstContact;
use koinet_types::{Result, Rid};
use tracing::{debug, info};

use crate::effector::{DerefOptions, Effector};
use crate::identity::NodeIdentity;
use crate::network::event_queue::NetworkEventQueue;
use crate::network::graph::NetworkGraph;
use crate::pipeline::KnowledgePipeline;

/// Startup sequence driver.
pub struct NodeLifecycle {
    identity: Arc<NodeIdentity>,
    graph: Arc<NetworkGraph>,
    effector: Arc<Effector>,
    pipeline: Arc<KnowledgePipeline>,
    event_queue: Arc<NetworkEventQueue>,
    first_contact: FirstContact,
}

impl NodeLifecycle {
    /// Creates the lifecycle driver.
    pub fn new(
        identity: Arc<NodeIdentity>,
        graph: Arc<NetworkGraph>,
        effector: Arc<Effector>,
        pipeline: Arc<KnowledgePipeline>,
        event_queue: Arc<NetworkEventQueue>,
        first_contact: FirstContact,
    ) -> Self {
        Self {
            identity,
            graph,
            effector,
            pipeline,
            event_queue,
            first_contact,
        }
    }

    /// Runs startup: graph rebuild, self-dereference (seeding our own
    /// bundle through the pipeline), then the bootstrap handshake if we
    /// have no neighbors and a first contact is configured.
    pub async fn start(&self) -> Result<()> {
        self.graph.rebuild()?;

        // Refresh forces the profile action to regenerate and feed the
        // pipeline, so a changed profile propagates on restart.
        let opts = DerefOptions {
            refresh: true,
            use_network: false,
            feedback: true,
        };
        self.effector
            .dereference_with(self.identity.rid(), opts)
            .await?;
        self.pipeline.drain().await?;

        if self.graph.is_isolated() {
            if let Some(contact) = self.first_contact.rid.clone() {
                self.handshake(&contact).await?;
            } else {
                debug!("no neighbors and no first contact, staying quiet");
            }
        }
        Ok(())
    }

    /// Sends FORGET(self) then NEW(self) to the contact. The FORGET
    /// clears any stale identity the contact may hold from an earlier
    /// run, making re-announcement idempotent.
    async fn handshake(&self, contact: &Rid) -> Result<()> {
        info!(%contact, "bootstrapping via first contact");
        let me = self.identity.rid().clone();
        self.event_queue
            .push(Event::from_rid(EventType::Forget, me), contact, false)
            .await?;
        self.event_queue
            .push(
                Event::from_bundle(EventType::New, self.identity.bundle()?),
                contact,
                true,
            )
            .await?;
        Ok(())
    }
}
