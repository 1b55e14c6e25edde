//! The context handed to every knowledge handler.

use std::sync::Arc;

use koinet_storage::Cache;
use koinet_types::config::FirstContact;

use crate::effector::Effector;
use crate::identity::NodeIdentity;
use crate::knowledge::KnowledgeObject;
use crate::network::event_queue::NetworkEventQueue;
use crate::network::graph::NetworkGraph;
use crate::network::request::RequestHandler;
use crate::pipeline::KnowledgeQueue;

/// Immutable bundle of component handles available to handlers.
///
/// Handlers take what they need from here instead of capturing the
/// whole node. Cloning is cheap (all fields are shared handles).
#[derive(Clone)]
pub struct HandlerContext {
    /// This node's identity.
    pub identity: Arc<NodeIdentity>,
    /// The bundle cache.
    pub cache: Arc<dyn Cache>,
    /// The topology graph.
    pub graph: Arc<NetworkGraph>,
    /// RID resolver.
    pub effector: Arc<Effector>,
    /// Outbound event queue.
    pub event_queue: Arc<NetworkEventQueue>,
    /// Authenticated RPC client.
    pub requests: Arc<RequestHandler>,
    /// First contact configuration.
    pub first_contact: FirstContact,
    pub(crate) queue: Arc<KnowledgeQueue>,
}

impl HandlerContext {
    /// Enqueues a derived knowledge object for processing.
    ///
    /// The object is appended to the same FIFO the current drain is
    /// consuming, so it is processed later in the same drain pass —
    /// handlers never recurse into the pipeline directly.
    pub fn handle(&self, kobj: KnowledgeObject) {
        self.queue.push(kobj);
    }
}
