//! Network-facing components: topology graph, outbound event queue,
//! and the authenticated RPC client.

pub mod event_queue;
pub mod graph;
pub mod request;
