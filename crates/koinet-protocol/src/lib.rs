//! Wire types for the KOI-net knowledge distribution protocol.
//!
//! Everything that crosses a node boundary is defined here: versioned
//! manifests and bundles, change events, node and edge profiles, the
//! signed envelope that authenticates every message, and the payload
//! models of the five RPC endpoints. All signing and content hashing is
//! computed over canonical JSON ([`canonical`]) so digests agree across
//! implementations.

pub mod api;
pub mod bundle;
pub mod canonical;
pub mod edge;
pub mod envelope;
pub mod event;
pub mod node;

pub use bundle::{Bundle, Manifest};
pub use edge::{EdgeProfile, EdgeStatus, EdgeType};
pub use envelope::{SignedEnvelope, UnsignedEnvelope};
pub use event::{Event, EventType};
pub use node::{NodeProfile, NodeProvides, NodeType};
