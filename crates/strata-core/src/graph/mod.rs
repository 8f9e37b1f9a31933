//! Object graph: the nodes and links reachable from one root entity.
//!
//! Nodes live in a petgraph arena indexed by identity; links are edges
//! between node indices, so cyclic and self-referential entity graphs need
//! no shared ownership.

mod builder;
mod lifecycle;
mod link;
mod node;

pub use builder::ObjectGraphBuilder;
pub use lifecycle::Operation;
pub use link::NodeLink;
pub use node::{EntityKey, FlushAction, Node, NodeId, NodeState};

use crate::error::Result;
use crate::value::{Record, Row, Value};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Row prepared for a backend write.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    pub row: Row,
    /// A foreign key points at a row this plan inserts later; the column is
    /// null now and the row needs a patch once that insert is done
    pub needs_patch: bool,
}

/// Arena of nodes and links built for one entity manager operation.
#[derive(Debug, Default)]
pub struct ObjectGraph {
    /// The underlying petgraph instance
    graph: StableGraph<Node, NodeLink, petgraph::Directed>,

    /// Map from identity to NodeIndex for O(1) lookup
    node_index_map: HashMap<NodeId, NodeIndex>,

    head: Option<NodeIndex>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Node Operations
    // ------------------------------------------------------------------------

    /// Add a node, or return the index of the node with the same identity.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        if let Some(&idx) = self.node_index_map.get(node.id()) {
            return idx;
        }
        let id = node.id().clone();
        let idx = self.graph.add_node(node);
        self.node_index_map.insert(id, idx);
        idx
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(idx)
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> Option<&mut Node> {
        self.graph.node_weight_mut(idx)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn index_of(&self, id: &NodeId) -> Option<NodeIndex> {
        self.node_index_map.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index_map.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn head(&self) -> Option<NodeIndex> {
        self.head
    }

    pub fn head_node(&self) -> Option<&Node> {
        self.head.and_then(|idx| self.graph.node_weight(idx))
    }

    pub(crate) fn set_head(&mut self, idx: NodeIndex) {
        if let Some(previous) = self.head.and_then(|h| self.graph.node_weight_mut(h)) {
            previous.set_head(false);
        }
        if let Some(node) = self.graph.node_weight_mut(idx) {
            node.set_head(true);
            self.head = Some(idx);
        }
    }

    /// Override the head's state before transitions run.
    ///
    /// Used to carry a cached terminal state (Removed, Detached) into a
    /// freshly built graph.
    pub(crate) fn seed_head_state(&mut self, state: NodeState) {
        if let Some(node) = self.head.and_then(|h| self.graph.node_weight_mut(h)) {
            node.set_state(state);
        }
    }

    /// Give the head a pending write before transitions run.
    pub(crate) fn seed_head_action(&mut self, action: FlushAction) {
        if let Some(node) = self.head.and_then(|h| self.graph.node_weight_mut(h)) {
            node.set_action(Some(action));
        }
    }

    // ------------------------------------------------------------------------
    // Link Operations
    // ------------------------------------------------------------------------

    pub fn add_link(&mut self, source: NodeIndex, target: NodeIndex, link: NodeLink) -> EdgeIndex {
        self.graph.add_edge(source, target, link)
    }

    pub fn link(&self, edge: EdgeIndex) -> Option<&NodeLink> {
        self.graph.edge_weight(edge)
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing links of a node as `(edge, target)`, in insertion order.
    pub fn children(&self, idx: NodeIndex) -> Vec<(EdgeIndex, NodeIndex)> {
        self.neighbours(idx, Direction::Outgoing)
    }

    /// Incoming links of a node as `(edge, source)`, in insertion order.
    pub fn parents(&self, idx: NodeIndex) -> Vec<(EdgeIndex, NodeIndex)> {
        self.neighbours(idx, Direction::Incoming)
    }

    fn neighbours(&self, idx: NodeIndex, direction: Direction) -> Vec<(EdgeIndex, NodeIndex)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (edge.id(), other)
            })
            .collect();
        edges.sort_by_key(|(edge, _)| *edge);
        edges
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Apply `operation` to the head and cascade it along eligible links.
    ///
    /// Each node transitions at most once. The first invalid transition
    /// aborts; no backend I/O has happened at this point.
    pub fn cascade(&mut self, operation: Operation) -> Result<()> {
        let Some(head) = self.head else {
            return Ok(());
        };
        let cascade = operation.cascade_type();
        let mut visited = HashSet::new();
        let mut stack = vec![head];

        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            if let Some(node) = self.graph.node_weight_mut(idx) {
                node.apply(operation)?;
                trace!("{} {} -> {}", operation, node.id(), node.state());
            }
            // Reverse so the first declared relation is visited first
            for (edge, child) in self.children(idx).into_iter().rev() {
                if self.graph[edge].cascades(cascade) {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Flush Support
    // ------------------------------------------------------------------------

    /// Build the row written for a node: identifier, declared columns and
    /// foreign-key columns taken from resolved links.
    pub fn row_for(&self, idx: NodeIndex) -> Option<PreparedRow> {
        let node = self.graph.node_weight(idx)?;
        let descriptor = node.descriptor();
        let mut row = Row::new();
        for column in descriptor.stored_columns() {
            if let Some(value) = node.data().get(column) {
                row.insert(column.to_string(), value.clone());
            }
        }
        if node.id().is_pending() {
            row.remove(&descriptor.id_column);
        }

        let mut needs_patch = false;
        let outgoing = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| edge.weight().source_holds_key())
            .map(|edge| (edge.weight(), edge.target()));
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| edge.weight().target_holds_key())
            .map(|edge| (edge.weight(), edge.source()));

        for (link, referenced) in outgoing.chain(incoming) {
            let Some(ref column) = link.join_column else {
                continue;
            };
            match self.link_key(link, referenced) {
                Some(value) => {
                    row.insert(column.clone(), value);
                }
                None => {
                    trace!("{}.{} unresolved for {}", node.id(), column, link.relation);
                    row.insert(column.clone(), Value::Null);
                    if self.inserted_later(referenced) {
                        needs_patch = true;
                    }
                }
            }
        }

        Some(PreparedRow { row, needs_patch })
    }

    /// Whether `idx` still has a pending insert, i.e. a row written before it
    /// in the same plan can only learn its key afterwards.
    fn inserted_later(&self, idx: NodeIndex) -> bool {
        self.graph
            .node_weight(idx)
            .is_some_and(|node| node.pending_action() == Some(FlushAction::Insert))
    }

    /// Foreign-key value of `link`, falling back to the referenced node's key
    /// when that node is already stored and not written by this plan.
    fn link_key(&self, link: &NodeLink, referenced: NodeIndex) -> Option<Value> {
        if let Some(value) = link.value() {
            return Some(value.clone());
        }
        let node = self.graph.node_weight(referenced)?;
        if node.id().is_pending() || node.pending_action() == Some(FlushAction::Insert) {
            None
        } else {
            Some(node.key().clone())
        }
    }

    /// Adopt the key reported by the store for a node.
    pub(crate) fn resolve_key(&mut self, idx: NodeIndex, key: Value) {
        let Some(node) = self.graph.node_weight_mut(idx) else {
            return;
        };
        let old_id = node.id().clone();
        node.resolve_key(key);
        let new_id = node.id().clone();
        if old_id != new_id {
            self.node_index_map.remove(&old_id);
            self.node_index_map.insert(new_id, idx);
        }
    }

    /// Record a flushed node's key on every link incident to it and clear its
    /// pending action.
    pub(crate) fn complete_flush(&mut self, idx: NodeIndex) {
        let Some(node) = self.graph.node_weight_mut(idx) else {
            return;
        };
        node.set_action(None);
        let key = node.key().clone();
        if key.is_null() {
            return;
        }

        for (edge, _) in self.children(idx) {
            self.graph[edge].set_source_key(key.clone());
        }
        for (edge, _) in self.parents(idx) {
            self.graph[edge].set_target_key(key.clone());
        }
    }

    /// Copy of a node's data with keys resolved so far written back into it
    /// and into every nested related record.
    pub fn materialize(&self, idx: NodeIndex) -> Option<Record> {
        let node = self.graph.node_weight(idx)?;
        let mut record = node.data().clone();
        self.refresh_keys(&mut record, idx);
        Some(record)
    }

    fn refresh_keys(&self, record: &mut Record, idx: NodeIndex) {
        let Some(node) = self.graph.node_weight(idx) else {
            return;
        };
        if !node.key().is_null() {
            record.set(&node.descriptor().id_column, node.key().clone());
        }
        for (edge, child) in self.children(idx) {
            let link = &self.graph[edge];
            let Some(related) = record.related_mut(&link.relation) else {
                continue;
            };
            if let Some(nested) = related.records_mut().nth(link.ordinal) {
                self.refresh_keys(nested, child);
            }
        }
    }
}
