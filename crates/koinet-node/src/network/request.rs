//! Authenticated RPC client: signed POSTs to peer endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use koinet_protocol::api::{
    BundlesPayload, ErrorResponse, EventsPayload, FetchBundles, FetchManifests, FetchRids,
    ManifestsPayload, PollEvents, RidsPayload, WireErrorKind, BROADCAST_EVENTS_PATH,
    FETCH_BUNDLES_PATH, FETCH_MANIFESTS_PATH, FETCH_RIDS_PATH, POLL_EVENTS_PATH,
};
use koinet_protocol::{Bundle, Event, NodeProfile, NodeType, SignedEnvelope};
use koinet_storage::Cache;
use koinet_types::config::FirstContact;
use koinet_types::{KoiNetError, Result, Rid};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::effector::BundleFetcher;
use crate::identity::NodeIdentity;
use crate::network::event_queue::EventTransport;
use crate::secure::Secure;

/// RPC client bound to this node's identity and cache.
pub struct RequestHandler {
    identity: Arc<NodeIdentity>,
    cache: Arc<dyn Cache>,
    secure: Arc<Secure>,
    first_contact: FirstContact,
    client: reqwest::Client,
}

impl RequestHandler {
    /// Builds the client with a bounded per-request timeout.
    pub fn new(
        identity: Arc<NodeIdentity>,
        cache: Arc<dyn Cache>,
        secure: Arc<Secure>,
        first_contact: FirstContact,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KoiNetError::NetworkError {
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            identity,
            cache,
            secure,
            first_contact,
            client,
        })
    }

    /// Resolves the base URL for a peer.
    ///
    /// The configured first contact is authoritative for its RID; any
    /// other peer must have a cached FULL profile with a `base_url`.
    /// Self-reference is an error.
    pub fn resolve_url(&self, node: &Rid) -> Result<String> {
        if node == self.identity.rid() {
            return Err(KoiNetError::ProtocolError {
                reason: "cannot issue a request to self".into(),
            });
        }
        if self.first_contact.rid.as_ref() == Some(node) {
            if let Some(url) = &self.first_contact.url {
                return Ok(url.clone());
            }
        }
        let Some(bundle) = self.cache.read(node)? else {
            return Err(KoiNetError::UnknownNode {
                rid: node.as_str().to_string(),
            });
        };
        let profile: NodeProfile = bundle.validate_contents()?;
        match (&profile.node_type, profile.base_url) {
            (NodeType::Full, Some(url)) => Ok(url),
            _ => Err(KoiNetError::UnreachablePeer {
                reason: format!("{node} is not a reachable full node"),
            }),
        }
    }

    /// Sends a signed request and unwraps the signed response.
    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        node: &Rid,
        path: &str,
        payload: &Req,
    ) -> Result<Resp> {
        let url = self.resolve_url(node)?;
        let envelope = self.secure.create_envelope(payload, node)?;
        let response = self
            .client
            .post(format!("{url}{path}"))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| KoiNetError::UnreachablePeer {
                reason: format!("{node}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorResponse =
                response.json().await.map_err(|e| KoiNetError::ProtocolError {
                    reason: format!("unparseable error response from {node}: {e}"),
                })?;
            return Err(wire_error(node, body.error));
        }

        let reply: SignedEnvelope =
            response.json().await.map_err(|e| KoiNetError::ProtocolError {
                reason: format!("unparseable response envelope from {node}: {e}"),
            })?;
        if let Err(e) = self.secure.validate_envelope(&reply).await {
            // During bootstrap the first contact's profile is not cached
            // yet; its acks cannot be verified until its bundle arrives.
            let bootstrap = matches!(e, KoiNetError::UnknownNode { .. })
                && self.first_contact.rid.as_ref() == Some(node);
            if bootstrap {
                warn!(%node, "accepting unverified response from first contact");
            } else {
                return Err(e);
            }
        }
        reply.payload_as()
    }

    /// Pushes events to a peer's broadcast endpoint.
    pub async fn broadcast_events(&self, node: &Rid, events: Vec<Event>) -> Result<()> {
        debug!(%node, count = events.len(), "broadcasting events");
        let _: serde_json::Value = self
            .call(node, BROADCAST_EVENTS_PATH, &EventsPayload { events })
            .await?;
        Ok(())
    }

    /// Drains events a peer has parked for us.
    pub async fn poll_events(&self, node: &Rid, limit: usize) -> Result<Vec<Event>> {
        let payload = PollEvents {
            rid: self.identity.rid().clone(),
            limit,
        };
        let reply: EventsPayload = self.call(node, POLL_EVENTS_PATH, &payload).await?;
        Ok(reply.events)
    }

    /// Lists a peer's cached RIDs by type.
    pub async fn fetch_rids(&self, node: &Rid, rid_types: Vec<String>) -> Result<RidsPayload> {
        self.call(node, FETCH_RIDS_PATH, &FetchRids { rid_types })
            .await
    }

    /// Fetches manifests from a peer.
    pub async fn fetch_manifests(
        &self,
        node: &Rid,
        request: FetchManifests,
    ) -> Result<ManifestsPayload> {
        self.call(node, FETCH_MANIFESTS_PATH, &request).await
    }

    /// Fetches full bundles from a peer.
    pub async fn fetch_bundles(&self, node: &Rid, rids: Vec<Rid>) -> Result<BundlesPayload> {
        self.call(node, FETCH_BUNDLES_PATH, &FetchBundles { rids })
            .await
    }
}

fn wire_error(node: &Rid, kind: WireErrorKind) -> KoiNetError {
    match kind {
        WireErrorKind::UnknownNode => KoiNetError::UnknownNode {
            rid: node.as_str().to_string(),
        },
        WireErrorKind::InvalidKey => KoiNetError::InvalidKey {
            rid: node.as_str().to_string(),
        },
        WireErrorKind::InvalidSignature => KoiNetError::InvalidSignature {
            reason: format!("rejected by {node}"),
        },
        WireErrorKind::InvalidTarget => KoiNetError::InvalidTarget {
            target: node.as_str().to_string(),
        },
    }
}

#[async_trait]
impl EventTransport for RequestHandler {
    async fn broadcast(&self, target: &Rid, events: Vec<Event>) -> Result<()> {
        self.broadcast_events(target, events).await
    }
}

#[async_trait]
impl BundleFetcher for RequestHandler {
    async fn fetch_remote_bundle(&self, provider: &Rid, rid: &Rid) -> Result<Option<Bundle>> {
        let reply = self.fetch_bundles(provider, vec![rid.clone()]).await?;
        Ok(reply.bundles.into_iter().find(|b| b.rid() == rid))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_crypto::Keypair;
    use koinet_protocol::NodeProvides;
    use koinet_storage::MemoryCache;

    use crate::effector::Effector;
    use crate::pipeline::KnowledgeQueue;

    fn handler(first_contact: FirstContact) -> (Arc<MemoryCache>, RequestHandler) {
        let identity = match NodeIdentity::new(
            "me",
            None,
            NodeProvides::default(),
            Keypair::generate(),
        ) {
            Ok(id) => Arc::new(id),
            Err(e) => panic!("identity: {e}"),
        };
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(KnowledgeQueue::new());
        let effector = Arc::new(Effector::new(
            identity.rid().clone(),
            cache.clone(),
            queue,
        ));
        let secure = Arc::new(Secure::new(identity.clone(), effector));
        let rh = match RequestHandler::new(identity, cache.clone(), secure, first_contact, 5) {
            Ok(rh) => rh,
            Err(e) => panic!("request handler: {e}"),
        };
        (cache, rh)
    }

    fn peer() -> Rid {
        Rid::new("orn:koi-net.node:peer+bb")
    }

    #[test]
    fn self_reference_is_an_error() {
        let (_cache, rh) = handler(FirstContact::default());
        let me = rh.identity.rid().clone();
        assert!(rh.resolve_url(&me).is_err());
    }

    #[test]
    fn first_contact_url_wins() -> Result<()> {
        let fc = FirstContact {
            rid: Some(peer()),
            url: Some("http://hub.example:8351".into()),
        };
        let (_cache, rh) = handler(fc);
        assert_eq!(rh.resolve_url(&peer())?, "http://hub.example:8351");
        Ok(())
    }

    #[test]
    fn unknown_peer_cannot_be_resolved() {
        let (_cache, rh) = handler(FirstContact::default());
        match rh.resolve_url(&peer()) {
            Err(KoiNetError::UnknownNode { .. }) => {}
            other => panic!("expected UnknownNode, got {other:?}"),
        }
    }

    #[test]
    fn partial_peer_is_unreachable() -> Result<()> {
        let (cache, rh) = handler(FirstContact::default());
        let profile = NodeProfile {
            base_url: None,
            node_type: NodeType::Partial,
            provides: NodeProvides::default(),
            public_key: "cGs=".into(),
        };
        let contents =
            serde_json::to_value(&profile).map_err(|e| KoiNetError::ProtocolError {
                reason: e.to_string(),
            })?;
        cache.write(&Bundle::generate(peer(), contents)?)?;
        match rh.resolve_url(&peer()) {
            Err(KoiNetError::UnreachablePeer { .. }) => Ok(()),
            other => panic!("expected UnreachablePeer, got {other:?}"),
        }
    }

    #[test]
    fn full_peer_resolves_to_base_url() -> Result<()> {
        let (cache, rh) = handler(FirstContact::default());
        let profile = NodeProfile {
            base_url: Some("http://peer.example:8351".into()),
            node_type: NodeType::Full,
            provides: NodeProvides::default(),
            public_key: "cGs=".into(),
        };
        let contents =
            serde_json::to_value(&profile).map_err(|e| KoiNetError::ProtocolError {
                reason: e.to_string(),
            })?;
        cache.write(&Bundle::generate(peer(), contents)?)?;
        assert_eq!(rh.resolve_url(&peer())?, "http://peer.example:8351");
        Ok(())
    }
}
