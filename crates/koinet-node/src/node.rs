//! Node assembly: wires every component into a running whole.

use std::sync::{Arc, Weak};

use axum::Router;
use koinet_crypto::Keypair;
use koinet_storage::{Cache, FileCache};
use koinet_types::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::context::HandlerContext;
use crate::effector::{BundleFetcher, Effector};
use crate::handler::KnowledgeHandler;
use crate::handlers::default_handlers;
use crate::identity::NodeIdentity;
use crate::lifecycle::NodeLifecycle;
use crate::network::event_queue::{EventTransport, NetworkEventQueue};
use crate::network::graph::NetworkGraph;
use crate::network::request::RequestHandler;
use crate::pipeline::{KnowledgePipeline, KnowledgeQueue};
use crate::poller::NodePoller;
use crate::secure::Secure;
use crate::server::{router, ServerState};

/// Builder for [`KoiNode`].
///
/// Tests typically override the cache (in-memory) and the transport
/// (recording); production uses the defaults derived from the config.
pub struct KoiNodeBuilder {
    config: NodeConfig,
    keypair: Option<Keypair>,
    cache: Option<Arc<dyn Cache>>,
    transport: Option<Arc<dyn EventTransport>>,
    extra_handlers: Vec<Arc<dyn KnowledgeHandler>>,
}

impl KoiNodeBuilder {
    /// Starts a builder from a validated-on-build config.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            keypair: None,
            cache: None,
            transport: None,
            extra_handlers: Vec::new(),
        }
    }

    /// Uses an explicit keypair instead of generating one.
    pub fn keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Uses an explicit cache instead of the configured file cache.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the outbound event transport (the broadcast RPC).
    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers an application handler after the default chain.
    pub fn handler(mut self, handler: Arc<dyn KnowledgeHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    /// Wires and returns the node.
    pub fn build(self) -> Result<KoiNode> {
        self.config.validate()?;
        let settings = self.config.settings.clone();
        let first_contact = settings.first_contact.clone();

        let keypair = self.keypair.unwrap_or_else(Keypair::generate);
        let identity = Arc::new(NodeIdentity::new(
            &settings.node_name,
            self.config.base_url.clone(),
            self.config.provides.clone(),
            keypair,
        )?);

        let cache: Arc<dyn Cache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(FileCache::open(&settings.cache_directory)?),
        };

        let queue = Arc::new(KnowledgeQueue::new());
        let graph = Arc::new(NetworkGraph::new(identity.rid().clone(), cache.clone()));
        let effector = Arc::new(Effector::new(
            identity.rid().clone(),
            cache.clone(),
            queue.clone(),
        ));

        // Our own profile is synthetic content: always derivable, never
        // fetched.
        {
            let identity = identity.clone();
            effector.register_action(koinet_types::Rid::NODE_PREFIX, move |rid| {
                if rid == identity.rid() {
                    identity.bundle().map(Some)
                } else {
                    Ok(None)
                }
            });
        }

        let secure = Arc::new(Secure::new(identity.clone(), effector.clone()));
        let requests = Arc::new(RequestHandler::new(
            identity.clone(),
            cache.clone(),
            secure.clone(),
            first_contact.clone(),
            settings.request_timeout_secs,
        )?);
        effector.set_network(Arc::downgrade(&requests) as Weak<dyn BundleFetcher>);

        let transport: Arc<dyn EventTransport> = match self.transport {
            Some(transport) => transport,
            None => requests.clone(),
        };
        let event_queue = Arc::new(NetworkEventQueue::new(
            identity.rid().clone(),
            effector.clone(),
            graph.clone(),
            first_contact.clone(),
            transport,
            settings.mailbox_capacity,
            settings.flush_retry_max,
        ));

        let ctx = HandlerContext {
            identity: identity.clone(),
            cache: cache.clone(),
            graph: graph.clone(),
            effector: effector.clone(),
            event_queue: event_queue.clone(),
            requests: requests.clone(),
            first_contact: first_contact.clone(),
            queue,
        };
        let mut handlers = default_handlers();
        handlers.extend(self.extra_handlers);
        let pipeline = Arc::new(KnowledgePipeline::new(ctx, handlers));

        let lifecycle = NodeLifecycle::new(
            identity.clone(),
            graph.clone(),
            effector.clone(),
            pipeline.clone(),
            event_queue.clone(),
            first_contact.clone(),
        );
        let poller = Arc::new(NodePoller::new(
            identity.clone(),
            cache.clone(),
            graph.clone(),
            pipeline.clone(),
            requests.clone(),
            first_contact,
            settings.polling_interval_secs,
        ));

        Ok(KoiNode {
            config: self.config,
            identity,
            cache,
            graph,
            effector,
            secure,
            requests,
            event_queue,
            pipeline,
            lifecycle,
            poller,
        })
    }
}

/// A fully-wired node.
pub struct KoiNode {
    /// The configuration the node was built from.
    pub config: NodeConfig,
    /// This node's identity.
    pub identity: Arc<NodeIdentity>,
    /// The bundle cache.
    pub cache: Arc<dyn Cache>,
    /// The topology graph.
    pub graph: Arc<NetworkGraph>,
    /// RID resolver.
    pub effector: Arc<Effector>,
    /// Envelope service.
    pub secure: Arc<Secure>,
    /// RPC client.
    pub requests: Arc<RequestHandler>,
    /// Outbound event queue.
    pub event_queue: Arc<NetworkEventQueue>,
    /// The knowledge pipeline.
    pub pipeline: Arc<KnowledgePipeline>,
    lifecycle: NodeLifecycle,
    poller: Arc<NodePoller>,
}

impl KoiNode {
    /// Runs the startup sequence (self-announcement and handshake).
    pub async fn start(&self) -> Result<()> {
        self.lifecycle.start().await
    }

    /// Builds the HTTP router serving the protocol endpoints.
    pub fn router(&self) -> Router {
        router(Arc::new(ServerState {
            cache: self.cache.clone(),
            secure: self.secure.clone(),
            pipeline: self.pipeline.clone(),
            event_queue: self.event_queue.clone(),
        }))
    }

    /// Spawns the periodic poller.
    pub fn spawn_poller(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.poller.clone().spawn(shutdown)
    }
}
