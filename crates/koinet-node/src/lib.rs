//! The KOI-net node: a peer in a knowledge distribution network.
//!
//! Facts flow through a staged handler pipeline ([`pipeline`]) that
//! validates, caches, and fans them out to subscribed peers. The network
//! topology is itself knowledge: node and edge bundles in the cache,
//! projected into a queryable graph ([`network::graph`]). Every wire
//! message is authenticated by a signed envelope ([`secure`]).

pub mod config;
pub mod context;
pub mod effector;
pub mod handler;
pub mod handlers;
pub mod identity;
pub mod knowledge;
pub mod lifecycle;
pub mod network;
pub mod node;
pub mod pipeline;
pub mod poller;
pub mod secure;
pub mod server;

pub use config::NodeConfig;
pub use context::HandlerContext;
pub use effector::{DerefOptions, Effector};
pub use handler::{HandlerOutcome, KnowledgeHandler, SourceKind, Stage};
pub use identity::NodeIdentity;
pub use knowledge::{KnowledgeObject, KnowledgeSource};
pub use network::event_queue::{EventTransport, NetworkEventQueue};
pub use network::graph::{Direction, NetworkGraph};
pub use network::request::RequestHandler;
pub use node::{KoiNode, KoiNodeBuilder};
pub use pipeline::{KnowledgePipeline, KnowledgeQueue};
pub use secure::Secure;
