//! The effector: resolves an RID to a bundle by whatever means exist.
//!
//! Resolution order is cache, then the synthetic action table, then the
//! network. Non-cache hits are fed back into the pipeline queue so the
//! resolved fact becomes cached and propagated like any other.

use std::sync::{Arc, OnceLock, RwLock, Weak};

use async_trait::async_trait;
use koinet_protocol::{Bundle, NodeProfile};
use koinet_storage::Cache;
use koinet_types::{KoiNetError, Result, Rid};
use tracing::{debug, warn};

use crate::knowledge::{KnowledgeObject, KnowledgeSource};
use crate::pipeline::KnowledgeQueue;

/// Fetches a bundle from a remote provider. Implemented by the request
/// handler; held weakly here to break the construction cycle.
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    /// Asks `provider` for the bundle of `rid`; `None` if it lacks it.
    async fn fetch_remote_bundle(&self, provider: &Rid, rid: &Rid) -> Result<Option<Bundle>>;
}

/// Options for a single dereference.
#[derive(Clone, Copy, Debug)]
pub struct DerefOptions {
    /// Skip the cache arm, forcing regeneration or refetch.
    pub refresh: bool,
    /// Allow the network arm.
    pub use_network: bool,
    /// Feed non-cache hits back into the pipeline queue.
    pub feedback: bool,
}

impl Default for DerefOptions {
    fn default() -> Self {
        Self {
            refresh: false,
            use_network: true,
            feedback: true,
        }
    }
}

impl DerefOptions {
    /// Cache and actions only, no feedback. Used when resolution must
    /// not recurse into RPCs (envelope validation, queue routing).
    pub fn local_only() -> Self {
        Self {
            refresh: false,
            use_network: false,
            feedback: false,
        }
    }
}

type ActionFn = Arc<dyn Fn(&Rid) -> Result<Option<Bundle>> + Send + Sync>;

/// RID-to-bundle resolver with cache, action, and network arms.
pub struct Effector {
    me: Rid,
    cache: Arc<dyn Cache>,
    queue: Arc<KnowledgeQueue>,
    actions: RwLock<Vec<(String, ActionFn)>>,
    network: OnceLock<Weak<dyn BundleFetcher>>,
}

impl Effector {
    /// Creates an effector with an empty action table and no network arm.
    pub fn new(me: Rid, cache: Arc<dyn Cache>, queue: Arc<KnowledgeQueue>) -> Self {
        Self {
            me,
            cache,
            queue,
            actions: RwLock::new(Vec::new()),
            network: OnceLock::new(),
        }
    }

    /// Wires the network arm. May be called at most once.
    pub fn set_network(&self, fetcher: Weak<dyn BundleFetcher>) {
        if self.network.set(fetcher).is_err() {
            warn!("effector network arm already wired, ignoring");
        }
    }

    /// Registers a synthetic content generator for an RID type prefix.
    pub fn register_action<F>(&self, prefix: &str, action: F)
    where
        F: Fn(&Rid) -> Result<Option<Bundle>> + Send + Sync + 'static,
    {
        if let Ok(mut actions) = self.actions.write() {
            actions.push((prefix.to_string(), Arc::new(action)));
        }
    }

    /// Longest-prefix-match over the action table; registration order
    /// breaks exact-length ties.
    fn lookup_action(&self, rid: &Rid) -> Option<ActionFn> {
        let actions = self.actions.read().ok()?;
        let mut best: Option<(usize, &ActionFn)> = None;
        for (prefix, action) in actions.iter() {
            if rid.has_type(prefix) {
                let longer = match best {
                    Some((len, _)) => prefix.len() > len,
                    None => true,
                };
                if longer {
                    best = Some((prefix.len(), action));
                }
            }
        }
        best.map(|(_, action)| action.clone())
    }

    /// Resolves `rid` with default options.
    pub async fn dereference(&self, rid: &Rid) -> Result<Option<Bundle>> {
        self.dereference_with(rid, DerefOptions::default()).await
    }

    /// Resolves `rid`: cache, then action table, then network.
    pub async fn dereference_with(
        &self,
        rid: &Rid,
        opts: DerefOptions,
    ) -> Result<Option<Bundle>> {
        if !opts.refresh {
            if let Some(bundle) = self.cache.read(rid)? {
                return Ok(Some(bundle));
            }
        }

        if let Some(action) = self.lookup_action(rid) {
            if let Some(bundle) = action(rid)? {
                debug!(%rid, "dereferenced via action table");
                if opts.feedback {
                    self.queue.push(KnowledgeObject::from_bundle(
                        bundle.clone(),
                        KnowledgeSource::Internal,
                    ));
                }
                return Ok(Some(bundle));
            }
        }

        if opts.use_network {
            if let Some(bundle) = self.dereference_network(rid, opts.feedback).await? {
                return Ok(Some(bundle));
            }
        }

        Ok(None)
    }

    /// Network arm: try every known node whose profile offers state for
    /// this RID's type; first hit wins.
    async fn dereference_network(&self, rid: &Rid, feedback: bool) -> Result<Option<Bundle>> {
        let Some(fetcher) = self.network.get().and_then(Weak::upgrade) else {
            return Ok(None);
        };
        let prefix = rid.type_prefix().to_string();
        for provider in self.state_providers(&prefix)? {
            match fetcher.fetch_remote_bundle(&provider, rid).await {
                Ok(Some(bundle)) => {
                    debug!(%rid, %provider, "dereferenced via network");
                    if feedback {
                        self.queue.push(KnowledgeObject::from_bundle(
                            bundle.clone(),
                            KnowledgeSource::External(provider),
                        ));
                    }
                    return Ok(Some(bundle));
                }
                Ok(None) => {}
                Err(e) => debug!(%rid, %provider, error = %e, "remote dereference failed"),
            }
        }
        Ok(None)
    }

    /// Cached nodes whose profiles declare state coverage for `prefix`.
    fn state_providers(&self, prefix: &str) -> Result<Vec<Rid>> {
        let mut providers = Vec::new();
        for rid in self.cache.list_rids()? {
            if !rid.is_node() || rid == self.me {
                continue;
            }
            let Some(bundle) = self.cache.read(&rid)? else {
                continue;
            };
            let Ok(profile) = bundle.validate_contents::<NodeProfile>() else {
                continue;
            };
            if profile
                .provides
                .state
                .iter()
                .any(|p| prefix.starts_with(p.as_str()))
            {
                providers.push(rid);
            }
        }
        Ok(providers)
    }

    /// Resolves `rid` and parses a node profile from the result.
    pub async fn dereference_profile(
        &self,
        rid: &Rid,
        opts: DerefOptions,
    ) -> Result<NodeProfile> {
        match self.dereference_with(rid, opts).await? {
            Some(bundle) => bundle.validate_contents(),
            None => Err(KoiNetError::UnknownNode {
                rid: rid.as_str().to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_storage::MemoryCache;
    use serde_json::json;

    fn build() -> (Arc<MemoryCache>, Arc<KnowledgeQueue>, Effector) {
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(KnowledgeQueue::new());
        let effector = Effector::new(
            Rid::new("orn:koi-net.node:me+aa"),
            cache.clone(),
            queue.clone(),
        );
        (cache, queue, effector)
    }

    fn bundle(rid: &str, v: u64) -> Bundle {
        match Bundle::generate(Rid::new(rid), json!({"v": v})) {
            Ok(b) => b,
            Err(e) => panic!("bundle: {e}"),
        }
    }

    #[tokio::test]
    async fn cache_hit_wins_without_feedback() -> Result<()> {
        let (cache, queue, effector) = build();
        let b = bundle("orn:test:1", 1);
        cache.write(&b)?;
        effector.register_action("orn:test", |_| panic!("action must not run"));
        assert_eq!(effector.dereference(b.rid()).await?, Some(b));
        assert!(queue.pop().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn action_hit_feeds_pipeline_queue() -> Result<()> {
        let (_cache, queue, effector) = build();
        effector.register_action("orn:test", |rid| {
            Bundle::generate(rid.clone(), json!({"generated": true})).map(Some)
        });
        let rid = Rid::new("orn:test:1");
        let hit = effector.dereference(&rid).await?;
        assert!(hit.is_some());
        let kobj = match queue.pop() {
            Some(k) => k,
            None => panic!("expected feedback object"),
        };
        assert_eq!(kobj.rid, rid);
        assert_eq!(kobj.source, KnowledgeSource::Internal);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_skips_cache() -> Result<()> {
        let (cache, _queue, effector) = build();
        let stale = bundle("orn:test:1", 1);
        cache.write(&stale)?;
        effector.register_action("orn:test", |rid| {
            Bundle::generate(rid.clone(), json!({"v": 2})).map(Some)
        });
        let opts = DerefOptions {
            refresh: true,
            ..DerefOptions::default()
        };
        let hit = effector.dereference_with(stale.rid(), opts).await?;
        assert_eq!(
            hit.and_then(|b| b.contents.get("v").cloned()),
            Some(json!(2))
        );
        Ok(())
    }

    #[tokio::test]
    async fn longest_prefix_action_wins() -> Result<()> {
        let (_cache, _queue, effector) = build();
        effector.register_action("orn:test", |rid| {
            Bundle::generate(rid.clone(), json!({"arm": "short"})).map(Some)
        });
        effector.register_action("orn:test.special", |rid| {
            Bundle::generate(rid.clone(), json!({"arm": "long"})).map(Some)
        });
        let hit = effector
            .dereference(&Rid::new("orn:test.special:1"))
            .await?;
        assert_eq!(
            hit.and_then(|b| b.contents.get("arm").cloned()),
            Some(json!("long"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_rid_is_none_not_error() -> Result<()> {
        let (_cache, _queue, effector) = build();
        assert_eq!(effector.dereference(&Rid::new("orn:test:1")).await?, None);
        Ok(())
    }
}
