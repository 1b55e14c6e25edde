//! The knowledge pipeline: a staged handler chain over a FIFO queue.
//!
//! One object at a time, strictly: the Manifest stage's staleness
//! decision reads cache state that the same pass later writes, so two
//! concurrent passes would race on that read-then-write. A single async
//! drain guard serializes all processing; handler-triggered insertions
//! go through the queue, never recursive calls.

use std::collections::VecDeque;
use std::sync::Mutex;

use koinet_protocol::api::FetchManifests;
use koinet_protocol::EventType;
use koinet_types::{Result, Rid};
use tracing::{debug, warn};

use crate::context::HandlerContext;
use crate::handler::{handler_matches, HandlerOutcome, KnowledgeHandler, Stage};
use crate::knowledge::KnowledgeObject;

// ---------------------------------------------------------------------------
// KnowledgeQueue
// ---------------------------------------------------------------------------

/// FIFO work queue of knowledge objects awaiting processing.
#[derive(Default)]
pub struct KnowledgeQueue {
    inner: Mutex<VecDeque<KnowledgeObject>>,
}

impl KnowledgeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object. Mid-drain insertions are appended, not
    /// prioritized.
    pub fn push(&self, kobj: KnowledgeObject) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push_back(kobj);
        }
    }

    /// Pops the oldest object, if any.
    pub fn pop(&self) -> Option<KnowledgeObject> {
        self.inner.lock().ok()?.pop_front()
    }

    /// Number of queued objects.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// KnowledgePipeline
// ---------------------------------------------------------------------------

enum StageResult {
    Continue(KnowledgeObject),
    Aborted,
}

/// The staged processor draining the knowledge queue.
pub struct KnowledgePipeline {
    ctx: HandlerContext,
    handlers: Vec<std::sync::Arc<dyn KnowledgeHandler>>,
    drain_guard: tokio::sync::Mutex<()>,
}

impl KnowledgePipeline {
    /// Creates a pipeline over the given handler chain. Registration
    /// order is execution order within each stage.
    pub fn new(
        ctx: HandlerContext,
        handlers: Vec<std::sync::Arc<dyn KnowledgeHandler>>,
    ) -> Self {
        Self {
            ctx,
            handlers,
            drain_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// The context handlers see. Exposed for wiring and tests.
    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Enqueues an object without processing it.
    pub fn enqueue(&self, kobj: KnowledgeObject) {
        self.ctx.queue.push(kobj);
    }

    /// Drains the queue to empty, one object at a time.
    ///
    /// Handlers may push derived objects mid-drain; those are consumed
    /// in the same call, making this a breadth-first closure over
    /// derived effects. A failed pass is logged and does not stop the
    /// drain.
    pub async fn drain(&self) -> Result<()> {
        let _guard = self.drain_guard.lock().await;
        while let Some(kobj) = self.ctx.queue.pop() {
            let rid = kobj.rid.clone();
            if let Err(e) = self.process(kobj).await {
                warn!(%rid, error = %e, "pipeline pass failed");
            }
        }
        Ok(())
    }

    /// Runs one object through all stages.
    async fn process(&self, kobj: KnowledgeObject) -> Result<()> {
        debug!(rid = %kobj.rid, source = ?kobj.source.peer(), "processing knowledge object");

        let mut kobj = match self.run_stage(Stage::Rid, kobj).await? {
            StageResult::Continue(k) => k,
            StageResult::Aborted => return Ok(()),
        };

        if kobj.event_type == Some(EventType::Forget) {
            // Forget needs no version gate, only an existing bundle.
            let Some(existing) = self.ctx.cache.read(&kobj.rid)? else {
                debug!(rid = %kobj.rid, "nothing to forget");
                return Ok(());
            };
            kobj.manifest = Some(existing.manifest);
            kobj.contents = Some(existing.contents);
            kobj.normalized_type = Some(EventType::Forget);
        } else {
            if kobj.manifest.is_none() && !self.fetch_manifest(&mut kobj).await? {
                return Ok(());
            }
            kobj = match self.run_stage(Stage::Manifest, kobj).await? {
                StageResult::Continue(k) => k,
                StageResult::Aborted => return Ok(()),
            };
            if kobj.contents.is_none() && !self.fetch_contents(&mut kobj).await? {
                return Ok(());
            }
        }

        kobj = match self.run_stage(Stage::Bundle, kobj).await? {
            StageResult::Continue(k) => k,
            StageResult::Aborted => return Ok(()),
        };

        match kobj.normalized_type {
            Some(EventType::New) | Some(EventType::Update) => {
                let Some(bundle) = kobj.bundle() else {
                    warn!(rid = %kobj.rid, "normalized write without a full bundle, dropping");
                    return Ok(());
                };
                self.ctx.cache.write(&bundle)?;
                debug!(rid = %kobj.rid, "bundle cached");
            }
            Some(EventType::Forget) => {
                self.ctx.cache.delete(&kobj.rid)?;
                debug!(rid = %kobj.rid, "bundle forgotten");
            }
            // A handler opted out without stopping: no-op, log only.
            None => {
                debug!(rid = %kobj.rid, "no normalized event type, dropping");
                return Ok(());
            }
        }

        if kobj.rid.is_topology() {
            self.ctx.graph.rebuild()?;
        }

        kobj = match self.run_stage(Stage::Network, kobj).await? {
            StageResult::Continue(k) => k,
            StageResult::Aborted => return Ok(()),
        };

        if let Some(event) = kobj.normalized_event() {
            for target in &kobj.network_targets {
                self.ctx
                    .event_queue
                    .push(event.clone(), target, true)
                    .await?;
            }
        }

        match self.run_stage(Stage::Final, kobj).await? {
            StageResult::Continue(_) | StageResult::Aborted => Ok(()),
        }
    }

    /// Runs every matching handler of one stage. Handler errors are an
    /// implicit stop for this object only.
    async fn run_stage(&self, stage: Stage, mut kobj: KnowledgeObject) -> Result<StageResult> {
        for handler in &self.handlers {
            if !handler_matches(handler.as_ref(), stage, &kobj) {
                continue;
            }
            match handler.apply(&self.ctx, kobj.clone()).await {
                Ok(HandlerOutcome::Pass) => {}
                Ok(HandlerOutcome::Replace(next)) => kobj = next,
                Ok(HandlerOutcome::Stop) => {
                    debug!(rid = %kobj.rid, handler = handler.name(), ?stage, "chain stopped");
                    return Ok(StageResult::Aborted);
                }
                Err(e) => {
                    warn!(rid = %kobj.rid, handler = handler.name(), ?stage, error = %e,
                        "handler failed, stopping chain");
                    return Ok(StageResult::Aborted);
                }
            }
        }
        Ok(StageResult::Continue(kobj))
    }

    /// Fetches the manifest from the object's source peer. Returns
    /// false (silent abort) when there is no source or the peer lacks
    /// the manifest.
    async fn fetch_manifest(&self, kobj: &mut KnowledgeObject) -> Result<bool> {
        let Some(peer) = kobj.source.peer().cloned() else {
            debug!(rid = %kobj.rid, "no manifest and no source, dropping");
            return Ok(false);
        };
        let request = FetchManifests {
            rid_types: Vec::new(),
            rids: vec![kobj.rid.clone()],
        };
        let reply = self.ctx.requests.fetch_manifests(&peer, request).await?;
        match reply.manifests.into_iter().find(|m| m.rid == kobj.rid) {
            Some(manifest) => {
                kobj.manifest = Some(manifest);
                Ok(true)
            }
            None => {
                debug!(rid = %kobj.rid, %peer, "source has no manifest, dropping");
                Ok(false)
            }
        }
    }

    /// Fetches the full bundle from the object's source peer.
    async fn fetch_contents(&self, kobj: &mut KnowledgeObject) -> Result<bool> {
        let Some(peer) = kobj.source.peer().cloned() else {
            debug!(rid = %kobj.rid, "no contents and no source, dropping");
            return Ok(false);
        };
        let reply = self
            .ctx
            .requests
            .fetch_bundles(&peer, vec![kobj.rid.clone()])
            .await?;
        match reply.bundles.into_iter().find(|b| b.rid() == &kobj.rid) {
            Some(bundle) => {
                kobj.manifest = Some(bundle.manifest);
                kobj.contents = Some(bundle.contents);
                Ok(true)
            }
            None => {
                debug!(rid = %kobj.rid, %peer, "source has no bundle, dropping");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
