//! Network topology derived from cached node and edge bundles.
//!
//! The graph is a disposable projection: every rebuild starts from the
//! full cache and replaces the previous state wholesale. There is no
//! incremental update path, so the graph can never be partially stale
//! relative to one mutation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use koinet_protocol::{EdgeProfile, EdgeStatus};
use koinet_storage::Cache;
use koinet_types::{KoiNetError, Result, Rid};
use tracing::{debug, warn};

/// Which end of an edge a neighbor query looks at, relative to this node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Edges pointing at us: neighbor is the edge source.
    In,
    /// Edges leaving us: neighbor is the edge target.
    Out,
    /// Both.
    Both,
}

#[derive(Default)]
struct GraphState {
    nodes: HashSet<Rid>,
    edges: HashMap<Rid, EdgeProfile>,
}

/// Directed graph of known nodes and edges, rebuilt from the cache.
pub struct NetworkGraph {
    me: Rid,
    cache: Arc<dyn Cache>,
    state: RwLock<GraphState>,
}

impl NetworkGraph {
    /// Creates an empty graph for the node identified by `me`.
    pub fn new(me: Rid, cache: Arc<dyn Cache>) -> Self {
        Self {
            me,
            cache,
            state: RwLock::new(GraphState::default()),
        }
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, GraphState>> {
        self.state.write().map_err(|_| KoiNetError::StorageError {
            reason: "graph lock poisoned".into(),
        })
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, GraphState>> {
        self.state.read().map_err(|_| KoiNetError::StorageError {
            reason: "graph lock poisoned".into(),
        })
    }

    /// Rebuilds the graph from every cached node and edge bundle.
    ///
    /// Unparseable edge bundles are skipped with a warning rather than
    /// failing the rebuild.
    pub fn rebuild(&self) -> Result<()> {
        let mut next = GraphState::default();
        for rid in self.cache.list_rids()? {
            if rid.is_node() {
                next.nodes.insert(rid);
            } else if rid.is_edge() {
                let Some(bundle) = self.cache.read(&rid)? else {
                    continue;
                };
                match bundle.validate_contents::<EdgeProfile>() {
                    Ok(profile) => {
                        next.edges.insert(rid, profile);
                    }
                    Err(e) => warn!(%rid, error = %e, "skipping unparseable edge bundle"),
                }
            }
        }
        debug!(
            nodes = next.nodes.len(),
            edges = next.edges.len(),
            "network graph rebuilt"
        );
        *self.write_state()? = next;
        Ok(())
    }

    /// Neighbors of this node.
    ///
    /// Returns the RID on the other end of each qualifying edge. An
    /// edge qualifies if its status matches `status` (when given) and,
    /// when `rid_type` is given, one of its subscribed prefixes is a
    /// string-prefix of `rid_type`.
    pub fn neighbors(
        &self,
        direction: Direction,
        status: Option<EdgeStatus>,
        rid_type: Option<&str>,
    ) -> Vec<Rid> {
        let Ok(state) = self.read_state() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for profile in state.edges.values() {
            if let Some(wanted) = status {
                if profile.status != wanted {
                    continue;
                }
            }
            if let Some(prefix) = rid_type {
                if !profile.rid_types.iter().any(|sub| prefix.starts_with(sub.as_str())) {
                    continue;
                }
            }
            let other = if profile.source == self.me {
                match direction {
                    Direction::Out | Direction::Both => Some(&profile.target),
                    Direction::In => None,
                }
            } else if profile.target == self.me {
                match direction {
                    Direction::In | Direction::Both => Some(&profile.source),
                    Direction::Out => None,
                }
            } else {
                None
            };
            if let Some(other) = other {
                if !out.contains(other) {
                    out.push(other.clone());
                }
            }
        }
        out
    }

    /// The edge from `source` to `target`, if known.
    pub fn edge_between(&self, source: &Rid, target: &Rid) -> Option<EdgeProfile> {
        let state = self.read_state().ok()?;
        state
            .edges
            .values()
            .find(|p| p.source == *source && p.target == *target)
            .cloned()
    }

    /// All known edges with their RIDs.
    pub fn edges(&self) -> Vec<(Rid, EdgeProfile)> {
        match self.read_state() {
            Ok(state) => state
                .edges
                .iter()
                .map(|(rid, p)| (rid.clone(), p.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// All known node RIDs.
    pub fn node_rids(&self) -> Vec<Rid> {
        match self.read_state() {
            Ok(state) => state.nodes.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// True if the graph currently has no neighbors in either direction.
    pub fn is_isolated(&self) -> bool {
        self.neighbors(Direction::Both, None, None).is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use koinet_protocol::edge::{edge_rid, generate_edge_bundle};
    use koinet_protocol::{Bundle, EdgeType};
    use koinet_storage::MemoryCache;
    use serde_json::json;

    fn rid(name: &str) -> Rid {
        Rid::new(format!("orn:koi-net.node:{name}+aa"))
    }

    fn seed_edge(
        cache: &MemoryCache,
        source: &Rid,
        target: &Rid,
        status: EdgeStatus,
        rid_types: &[&str],
    ) -> Result<()> {
        let profile = EdgeProfile {
            source: source.clone(),
            target: target.clone(),
            edge_type: EdgeType::Poll,
            status,
            rid_types: rid_types.iter().map(|s| s.to_string()).collect(),
        };
        cache.write(&generate_edge_bundle(&profile)?)
    }

    fn seed_node(cache: &MemoryCache, rid: &Rid) -> Result<()> {
        cache.write(&Bundle::generate(rid.clone(), json!({"node_type": "PARTIAL"}))?)
    }

    fn build() -> Result<(Arc<MemoryCache>, NetworkGraph)> {
        let cache = Arc::new(MemoryCache::new());
        let graph = NetworkGraph::new(rid("me"), cache.clone());
        Ok((cache, graph))
    }

    #[test]
    fn rebuild_projects_nodes_and_edges() -> Result<()> {
        let (cache, graph) = build()?;
        seed_node(&cache, &rid("me"))?;
        seed_node(&cache, &rid("peer"))?;
        seed_edge(&cache, &rid("me"), &rid("peer"), EdgeStatus::Approved, &["orn:test"])?;
        graph.rebuild()?;
        assert_eq!(graph.node_rids().len(), 2);
        assert_eq!(graph.edges().len(), 1);
        Ok(())
    }

    #[test]
    fn neighbors_respect_direction() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("me"), &rid("out"), EdgeStatus::Approved, &[])?;
        seed_edge(&cache, &rid("in"), &rid("me"), EdgeStatus::Approved, &[])?;
        graph.rebuild()?;
        assert_eq!(graph.neighbors(Direction::Out, None, None), vec![rid("out")]);
        assert_eq!(graph.neighbors(Direction::In, None, None), vec![rid("in")]);
        assert_eq!(graph.neighbors(Direction::Both, None, None).len(), 2);
        Ok(())
    }

    #[test]
    fn neighbors_filter_by_status_and_type() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("me"), &rid("a"), EdgeStatus::Approved, &["orn:test"])?;
        seed_edge(&cache, &rid("me"), &rid("b"), EdgeStatus::Proposed, &["orn:test"])?;
        seed_edge(&cache, &rid("me"), &rid("c"), EdgeStatus::Approved, &["orn:other"])?;
        graph.rebuild()?;
        let hits = graph.neighbors(Direction::Out, Some(EdgeStatus::Approved), Some("orn:test"));
        assert_eq!(hits, vec![rid("a")]);
        Ok(())
    }

    #[test]
    fn subscription_prefix_covers_narrower_types() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("me"), &rid("a"), EdgeStatus::Approved, &["orn:test"])?;
        graph.rebuild()?;
        let hits = graph.neighbors(Direction::Out, None, Some("orn:test.sub"));
        assert_eq!(hits, vec![rid("a")]);
        Ok(())
    }

    #[test]
    fn edge_between_is_directional() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("me"), &rid("peer"), EdgeStatus::Approved, &[])?;
        graph.rebuild()?;
        assert!(graph.edge_between(&rid("me"), &rid("peer")).is_some());
        assert!(graph.edge_between(&rid("peer"), &rid("me")).is_none());
        Ok(())
    }

    #[test]
    fn rebuild_replaces_prior_state() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("me"), &rid("peer"), EdgeStatus::Approved, &[])?;
        graph.rebuild()?;
        assert!(!graph.is_isolated());
        cache.delete(&edge_rid(&rid("me"), &rid("peer")))?;
        graph.rebuild()?;
        assert!(graph.is_isolated());
        Ok(())
    }

    #[test]
    fn foreign_edges_yield_no_neighbors() -> Result<()> {
        let (cache, graph) = build()?;
        seed_edge(&cache, &rid("a"), &rid("b"), EdgeStatus::Approved, &[])?;
        graph.rebuild()?;
        assert!(graph.is_isolated());
        assert_eq!(graph.edges().len(), 1);
        Ok(())
    }
}
