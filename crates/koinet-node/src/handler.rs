//! The pluggable knowledge handler: the unit of pipeline behavior.

use async_trait::async_trait;
use koinet_protocol::EventType;
use koinet_types::Result;

use crate::context::HandlerContext;
use crate::knowledge::{KnowledgeObject, KnowledgeSource};

// ---------------------------------------------------------------------------
// Stage / filters
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Before any cache lookup; may reject or force-normalize.
    Rid,
    /// After the manifest is known; version gating happens here.
    Manifest,
    /// After contents are known; content and policy validation.
    Bundle,
    /// After the cache mutation; computes propagation targets.
    Network,
    /// After fan-out; cleanup and derived effects.
    Final,
}

/// Source filter for handler registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceKind {
    /// Only locally-produced objects.
    Internal,
    /// Only objects received from peers.
    External,
}

impl SourceKind {
    fn matches(self, source: &KnowledgeSource) -> bool {
        match (self, source) {
            (SourceKind::Internal, KnowledgeSource::Internal) => true,
            (SourceKind::External, KnowledgeSource::External(_)) => true,
            _ => false,
        }
    }
}

/// What a handler decided about an object.
pub enum HandlerOutcome {
    /// Continue with the object unchanged.
    Pass,
    /// Continue with a replacement object.
    Replace(KnowledgeObject),
    /// Abort the remaining stages for this object.
    Stop,
}

// ---------------------------------------------------------------------------
// KnowledgeHandler
// ---------------------------------------------------------------------------

/// A registered pipeline behavior.
///
/// Handlers run in registration order within their stage; the first
/// Stop short-circuits the rest of the pass. An `Err` from `apply` is
/// logged and treated as a Stop for that object only — the queue keeps
/// draining.
#[async_trait]
pub trait KnowledgeHandler: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Which stage this handler runs in.
    fn stage(&self) -> Stage;

    /// RID type prefixes this handler applies to; `None` means all.
    fn rid_prefixes(&self) -> Option<Vec<String>> {
        None
    }

    /// Source restriction; `None` means both.
    fn source_filter(&self) -> Option<SourceKind> {
        None
    }

    /// Incoming event types this handler applies to; `None` means all.
    /// Objects with no incoming event type never match a non-`None`
    /// filter.
    fn event_filter(&self) -> Option<Vec<EventType>> {
        None
    }

    /// Runs the handler against one object.
    async fn apply(
        &self,
        ctx: &HandlerContext,
        kobj: KnowledgeObject,
    ) -> Result<HandlerOutcome>;
}

/// Whether a handler's filters admit this object at this stage.
pub(crate) fn handler_matches(
    handler: &dyn KnowledgeHandler,
    stage: Stage,
    kobj: &KnowledgeObject,
) -> bool {
    if handler.stage() != stage {
        return false;
    }
    if let Some(prefixes) = handler.rid_prefixes() {
        if !prefixes.iter().any(|p| kobj.rid.has_type(p)) {
            return false;
        }
    }
    if let Some(kind) = handler.source_filter() {
        if !kind.matches(&kobj.source) {
            return false;
        }
    }
    if let Some(events) = handler.event_filter() {
        match kobj.event_type {
            Some(t) => {
                if !events.contains(&t) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
