//! The default handler chain.
//!
//! Seven handlers cover the baseline protocol behavior: echo rejection,
//! version gating, key-binding enforcement, edge negotiation, peer
//! discovery through event providers, fan-out target selection, and the
//! forget cascade. Applications may register additional handlers; these
//! always run first, in the order listed here.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use koinet_protocol::edge::generate_edge_bundle;
use koinet_protocol::node::verify_key_binding;
use koinet_protocol::{
    EdgeProfile, EdgeStatus, EdgeType, Event, EventType, NodeProfile, NodeType,
};
use koinet_types::{Result, Rid};
use tracing::{debug, info, warn};

use crate::context::HandlerContext;
use crate::effector::DerefOptions;
use crate::handler::{HandlerOutcome, KnowledgeHandler, SourceKind, Stage};
use crate::knowledge::{KnowledgeObject, KnowledgeSource};
use crate::network::graph::Direction;

/// The default chain, in registration order.
pub fn default_handlers() -> Vec<Arc<dyn KnowledgeHandler>> {
    vec![
        Arc::new(EchoFilter),
        Arc::new(ManifestVersionGate),
        Arc::new(NodeKeyBinding),
        Arc::new(EdgeNegotiation),
        Arc::new(CoordinatorContact),
        Arc::new(NetworkFanOut),
        Arc::new(ForgetEdgeCascade),
    ]
}

// ---------------------------------------------------------------------------
// EchoFilter
// ---------------------------------------------------------------------------

/// Drops externally-sourced facts about our own RID. This node is the
/// only authority on its own profile.
struct EchoFilter;

#[async_trait]
impl KnowledgeHandler for EchoFilter {
    fn name(&self) -> &'static str {
        "echo_filter"
    }

    fn stage(&self) -> Stage {
        Stage::Rid
    }

    fn source_filter(&self) -> Option<SourceKind> {
        Some(SourceKind::External)
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        if kobj.rid == *ctx.identity.rid() {
            debug!(rid = %kobj.rid, "rejecting external echo of own identity");
            return Ok(HandlerOutcome::Stop);
        }
        Ok(HandlerOutcome::Pass)
    }
}

// ---------------------------------------------------------------------------
// ManifestVersionGate
// ---------------------------------------------------------------------------

/// Last-write-wins version gate.
///
/// Identical content hash is a duplicate, older-or-equal timestamp is
/// stale; both stop the chain. Otherwise the object is labeled NEW
/// (unseen RID) or UPDATE (seen), regardless of the sender's claim.
struct ManifestVersionGate;

#[async_trait]
impl KnowledgeHandler for ManifestVersionGate {
    fn name(&self) -> &'static str {
        "manifest_version_gate"
    }

    fn stage(&self) -> Stage {
        Stage::Manifest
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        mut kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        let Some(incoming) = kobj.manifest.clone() else {
            warn!(rid = %kobj.rid, "manifest stage reached without a manifest");
            return Ok(HandlerOutcome::Stop);
        };
        match ctx.cache.read(&kobj.rid)? {
            None => {
                kobj.normalized_type = Some(EventType::New);
            }
            Some(existing) => {
                if incoming.sha256_hash == existing.manifest.sha256_hash {
                    debug!(rid = %kobj.rid, "duplicate contents, no-op");
                    return Ok(HandlerOutcome::Stop);
                }
                if incoming.timestamp <= existing.manifest.timestamp {
                    debug!(rid = %kobj.rid, "stale version, ignoring");
                    return Ok(HandlerOutcome::Stop);
                }
                kobj.normalized_type = Some(EventType::Update);
            }
        }
        Ok(HandlerOutcome::Replace(kobj))
    }
}

// ---------------------------------------------------------------------------
// NodeKeyBinding
// ---------------------------------------------------------------------------

/// Rejects node bundles whose RID does not bind to the profile's key.
struct NodeKeyBinding;

#[async_trait]
impl KnowledgeHandler for NodeKeyBinding {
    fn name(&self) -> &'static str {
        "node_key_binding"
    }

    fn stage(&self) -> Stage {
        Stage::Bundle
    }

    fn rid_prefixes(&self) -> Option<Vec<String>> {
        Some(vec![Rid::NODE_PREFIX.to_string()])
    }

    async fn apply(
        &self,
        _ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        if kobj.normalized_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Pass);
        }
        let Some(contents) = kobj.contents.clone() else {
            warn!(rid = %kobj.rid, "node bundle without contents");
            return Ok(HandlerOutcome::Stop);
        };
        let profile: NodeProfile = match serde_json::from_value(contents) {
            Ok(p) => p,
            Err(e) => {
                warn!(rid = %kobj.rid, error = %e, "unparseable node profile");
                return Ok(HandlerOutcome::Stop);
            }
        };
        if let Err(e) = verify_key_binding(&kobj.rid, &profile.public_key) {
            warn!(rid = %kobj.rid, error = %e, "rejecting node with broken key binding");
            return Ok(HandlerOutcome::Stop);
        }
        Ok(HandlerOutcome::Pass)
    }
}

// ---------------------------------------------------------------------------
// EdgeNegotiation
// ---------------------------------------------------------------------------

/// Edge lifecycle policy.
///
/// Only the edge source may approve. Proposals naming this node as
/// source are decided here: approve by resubmitting an APPROVED
/// version, reject by sending FORGET back to the proposer.
struct EdgeNegotiation;

/// True if `requested` is covered by the offered prefix set.
fn prefix_allowed(requested: &str, offered: &[String]) -> bool {
    requested.starts_with(Rid::NODE_PREFIX)
        || requested.starts_with(Rid::EDGE_PREFIX)
        || offered.iter().any(|p| requested.starts_with(p.as_str()))
}

#[async_trait]
impl KnowledgeHandler for EdgeNegotiation {
    fn name(&self) -> &'static str {
        "edge_negotiation"
    }

    fn stage(&self) -> Stage {
        Stage::Bundle
    }

    fn rid_prefixes(&self) -> Option<Vec<String>> {
        Some(vec![Rid::EDGE_PREFIX.to_string()])
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        if kobj.normalized_type == Some(EventType::Forget) {
            return Ok(HandlerOutcome::Pass);
        }
        let Some(contents) = kobj.contents.clone() else {
            warn!(rid = %kobj.rid, "edge bundle without contents");
            return Ok(HandlerOutcome::Stop);
        };
        let profile: EdgeProfile = match serde_json::from_value(contents) {
            Ok(p) => p,
            Err(e) => {
                warn!(rid = %kobj.rid, error = %e, "unparseable edge profile");
                return Ok(HandlerOutcome::Stop);
            }
        };
        let me = ctx.identity.rid();

        // Only the edge source may move PROPOSED to APPROVED.
        if let KnowledgeSource::External(sender) = &kobj.source {
            if profile.status == EdgeStatus::Approved && sender != &profile.source {
                warn!(rid = %kobj.rid, %sender, "rejecting approval from non-source");
                return Ok(HandlerOutcome::Stop);
            }
        }

        if profile.source == *me && profile.status == EdgeStatus::Proposed {
            return self.negotiate(ctx, &kobj, profile).await;
        }

        // Our proposal approved by the peer, or a foreign edge: accept.
        Ok(HandlerOutcome::Pass)
    }
}

impl EdgeNegotiation {
    /// Decides a proposal naming this node as event source.
    async fn negotiate(
        &self,
        ctx: &HandlerContext,
        kobj: &KnowledgeObject,
        profile: EdgeProfile,
    ) -> Result<HandlerOutcome> {
        let peer = profile.target.clone();
        let peer_profile = match ctx
            .effector
            .dereference_with(&peer, DerefOptions::default())
            .await?
        {
            Some(bundle) => bundle.validate_contents::<NodeProfile>().ok(),
            None => None,
        };

        let rejection = match &peer_profile {
            None => Some("proposer unknown"),
            Some(p)
                if profile.edge_type == EdgeType::Webhook
                    && p.node_type == NodeType::Partial =>
            {
                Some("webhook edge to a partial node")
            }
            Some(_)
                if !profile
                    .rid_types
                    .iter()
                    .all(|rt| prefix_allowed(rt, &ctx.identity.profile().provides.event)) =>
            {
                Some("requested types not provided")
            }
            Some(_) => None,
        };

        if let Some(reason) = rejection {
            info!(rid = %kobj.rid, %peer, reason, "rejecting edge proposal");
            ctx.event_queue
                .push(
                    Event::from_rid(EventType::Forget, kobj.rid.clone()),
                    &peer,
                    true,
                )
                .await?;
            return Ok(HandlerOutcome::Stop);
        }

        info!(rid = %kobj.rid, %peer, "approving edge proposal");
        let approved = EdgeProfile {
            status: EdgeStatus::Approved,
            ..profile
        };
        let bundle = generate_edge_bundle(&approved)?;
        ctx.handle(
            KnowledgeObject::from_bundle(bundle, KnowledgeSource::Internal)
                .with_event_type(EventType::Update),
        );
        // The PROPOSED version is never cached; the APPROVED resubmission
        // replaces it within the same drain.
        Ok(HandlerOutcome::Stop)
    }
}

// ---------------------------------------------------------------------------
// CoordinatorContact
// ---------------------------------------------------------------------------

/// Reacts to newly-learned peers that provide node events: proposes a
/// POLL subscription to topology events and backfills node RIDs we have
/// never seen.
struct CoordinatorContact;

#[async_trait]
impl KnowledgeHandler for CoordinatorContact {
    fn name(&self) -> &'static str {
        "coordinator_contact"
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn rid_prefixes(&self) -> Option<Vec<String>> {
        Some(vec![Rid::NODE_PREFIX.to_string()])
    }

    fn source_filter(&self) -> Option<SourceKind> {
        Some(SourceKind::External)
    }

    fn event_filter(&self) -> Option<Vec<EventType>> {
        Some(vec![EventType::New])
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        let me = ctx.identity.rid().clone();
        if kobj.rid == me {
            return Ok(HandlerOutcome::Pass);
        }
        let Some(contents) = kobj.contents.clone() else {
            return Ok(HandlerOutcome::Pass);
        };
        let Ok(profile) = serde_json::from_value::<NodeProfile>(contents) else {
            return Ok(HandlerOutcome::Pass);
        };
        let provides_topology = profile
            .provides
            .event
            .iter()
            .any(|p| Rid::NODE_PREFIX.starts_with(p.as_str()));
        if !provides_topology {
            return Ok(HandlerOutcome::Pass);
        }

        if ctx.graph.edge_between(&kobj.rid, &me).is_none() {
            info!(peer = %kobj.rid, "proposing poll edge to event provider");
            let edge = EdgeProfile {
                source: kobj.rid.clone(),
                target: me.clone(),
                edge_type: EdgeType::Poll,
                status: EdgeStatus::Proposed,
                rid_types: vec![Rid::NODE_PREFIX.to_string(), Rid::EDGE_PREFIX.to_string()],
            };
            let bundle = generate_edge_bundle(&edge)?;
            ctx.handle(
                KnowledgeObject::from_bundle(bundle, KnowledgeSource::Internal)
                    .with_event_type(EventType::New),
            );
        }

        // Backfill: ask the provider for node RIDs we have never seen.
        match ctx
            .requests
            .fetch_rids(&kobj.rid, vec![Rid::NODE_PREFIX.to_string()])
            .await
        {
            Ok(reply) => {
                for rid in reply.rids {
                    if rid != me && !ctx.cache.exists(&rid)? {
                        ctx.handle(KnowledgeObject::from_rid(
                            rid,
                            KnowledgeSource::External(kobj.rid.clone()),
                        ));
                    }
                }
            }
            Err(e) => debug!(peer = %kobj.rid, error = %e, "node backfill failed"),
        }
        Ok(HandlerOutcome::Pass)
    }
}

// ---------------------------------------------------------------------------
// NetworkFanOut
// ---------------------------------------------------------------------------

/// Selects propagation targets: approved outgoing subscribers of this
/// RID's type, plus the counterparty of edges we create ourselves. The
/// originating peer is never targeted.
struct NetworkFanOut;

#[async_trait]
impl KnowledgeHandler for NetworkFanOut {
    fn name(&self) -> &'static str {
        "network_fan_out"
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        mut kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        let me = ctx.identity.rid();
        let prefix = kobj.rid.type_prefix().to_string();
        let mut targets: BTreeSet<Rid> = ctx
            .graph
            .neighbors(Direction::Out, Some(EdgeStatus::Approved), Some(&prefix))
            .into_iter()
            .collect();

        // Edges we author reach their counterparty even without a
        // subscription, or negotiation could never begin.
        if kobj.rid.is_edge() && kobj.source == KnowledgeSource::Internal {
            let edge = kobj
                .contents
                .clone()
                .and_then(|c| serde_json::from_value::<EdgeProfile>(c).ok());
            if let Some(edge) = edge {
                if edge.source == *me || edge.target == *me {
                    for endpoint in [edge.source, edge.target] {
                        if endpoint != *me {
                            targets.insert(endpoint);
                        }
                    }
                }
            }
        }

        if let KnowledgeSource::External(peer) = &kobj.source {
            targets.remove(peer);
        }
        targets.remove(me);

        kobj.network_targets.extend(targets);
        Ok(HandlerOutcome::Replace(kobj))
    }
}

// ---------------------------------------------------------------------------
// ForgetEdgeCascade
// ---------------------------------------------------------------------------

/// When a node is forgotten, forgets every cached edge referencing it.
struct ForgetEdgeCascade;

#[async_trait]
impl KnowledgeHandler for ForgetEdgeCascade {
    fn name(&self) -> &'static str {
        "forget_edge_cascade"
    }

    fn stage(&self) -> Stage {
        Stage::Final
    }

    fn rid_prefixes(&self) -> Option<Vec<String>> {
        Some(vec![Rid::NODE_PREFIX.to_string()])
    }

    async fn apply(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome> {
        if kobj.normalized_type != Some(EventType::Forget) {
            return Ok(HandlerOutcome::Pass);
        }
        for rid in ctx.cache.list_rids()? {
            if !rid.is_edge() {
                continue;
            }
            let Some(bundle) = ctx.cache.read(&rid)? else {
                continue;
            };
            let Ok(edge) = bundle.validate_contents::<EdgeProfile>() else {
                continue;
            };
            if edge.source == kobj.rid || edge.target == kobj.rid {
                info!(node = %kobj.rid, edge = %rid, "cascading forget to edge");
                ctx.handle(
                    KnowledgeObject::from_rid(rid, KnowledgeSource::Internal)
                        .with_event_type(EventType::Forget),
                );
            }
        }
        Ok(HandlerOutcome::Pass)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
