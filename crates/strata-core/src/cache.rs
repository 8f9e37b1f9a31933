//! Shared cache of head nodes.
//!
//! One [`PersistenceCache`] is shared by every entity manager of a factory.
//! Its read/write lock is also the unit-of-work lock: readers look up and
//! fetch under the read lock, writers hold the write lock for graph build,
//! plan execution and cache update.

use crate::graph::{Node, NodeId, NodeState};
use lru::LruCache;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::num::NonZeroUsize;
use strata_config::CacheConfig;
use tracing::{debug, trace};

/// Identity to node map guarded by [`PersistenceCache`].
#[derive(Debug)]
pub struct MainCache {
    nodes: LruCache<NodeId, Node>,
    /// Bumped by every mutation
    generation: u64,
}

impl MainCache {
    /// Cache holding at most `max_entries` nodes; 0 means unbounded.
    pub fn new(max_entries: usize) -> Self {
        let nodes = match NonZeroUsize::new(max_entries) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { nodes, generation: 0 }
    }

    /// Counter that changes whenever the cache is modified.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Look up a node without touching recency.
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.peek(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Insert or refresh a head node after a successful write.
    pub fn add_head_node(&mut self, node: Node) {
        let id = node.id().clone();
        trace!("Caching {} ({})", id, node.state());
        self.touch();
        if let Some((evicted, _)) = self.nodes.push(id.clone(), node) {
            if evicted != id {
                trace!("Evicted {} from cache", evicted);
            }
        }
    }

    /// Cache a node fetched from the store unless a fresher entry exists.
    ///
    /// Returns whether the node was cached. Dirty and Detached entries are
    /// replaced; clean Managed and Removed entries are kept.
    pub fn insert_found(&mut self, node: Node) -> bool {
        let replace = match self.nodes.peek(node.id()) {
            None => true,
            Some(existing) => existing.is_dirty() || existing.state() == NodeState::Detached,
        };
        if replace {
            self.add_head_node(node);
        }
        replace
    }

    /// Like [`insert_found`](Self::insert_found), but only if the cache is
    /// unchanged since `generation` was read.
    ///
    /// A fetch runs under the read lock and is cached under the write lock;
    /// a write in between may have made the fetched data stale.
    pub fn insert_found_since(&mut self, node: Node, generation: u64) -> bool {
        if self.generation != generation {
            trace!("Not caching {}: cache changed during fetch", node.id());
            return false;
        }
        self.insert_found(node)
    }

    /// Force a re-fetch on the next read of `id`.
    pub fn mark_dirty(&mut self, id: &NodeId) -> bool {
        self.touch();
        match self.nodes.peek_mut(id) {
            Some(node) => {
                node.set_dirty(true);
                true
            }
            None => false,
        }
    }

    /// Turn a cached entry into a Removed marker.
    pub fn mark_removed(&mut self, id: &NodeId) -> bool {
        self.touch();
        match self.nodes.peek_mut(id) {
            Some(node) => {
                node.set_state(NodeState::Removed);
                node.set_action(None);
                node.set_dirty(false);
                true
            }
            None => false,
        }
    }

    /// Record `node` as removed, whether or not it was cached before.
    pub fn insert_removed_marker(&mut self, mut node: Node) {
        node.set_state(NodeState::Removed);
        node.set_action(None);
        node.set_dirty(false);
        self.add_head_node(node);
    }

    /// Mark a cached entry Detached; returns whether it was cached.
    pub fn detach(&mut self, id: &NodeId) -> bool {
        self.touch();
        match self.nodes.peek_mut(id) {
            Some(node) => {
                node.detach();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        self.touch();
        self.nodes.pop(id)
    }

    /// Evict every Removed marker; returns how many were evicted.
    pub fn purge_removed(&mut self) -> usize {
        let removed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state() == NodeState::Removed)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            self.nodes.pop(id);
        }
        self.touch();
        removed.len()
    }

    pub fn clear(&mut self) {
        self.touch();
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Cached identities, most recently written first.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Cache shared across entity managers, guarded by one read/write lock.
///
/// Least-recently-written entries are evicted when a capacity is set, which
/// may also drop Removed markers.
#[derive(Debug)]
pub struct PersistenceCache {
    main: RwLock<MainCache>,
}

impl Default for PersistenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceCache {
    /// Unbounded cache.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            main: RwLock::new(MainCache::new(max_entries)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        debug!("Creating persistence cache (max_entries = {})", config.max_entries);
        Self::with_capacity(config.max_entries)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MainCache> {
        self.main.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MainCache> {
        self.main.write()
    }

    pub fn len(&self) -> usize {
        self.main.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.main.read().is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.main.read().contains(id)
    }

    /// Clone of the cached node for `id`.
    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.main.read().get(id).cloned()
    }
}
