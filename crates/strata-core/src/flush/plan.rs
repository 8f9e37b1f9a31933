//! Dependency-ordered flush plan for one object graph.

use crate::flush::join_table::{JoinTableOperation, PendingJoinTable};
use crate::flush::stack::FlushStack;
use crate::graph::{ObjectGraph, Operation};
use petgraph::stable_graph::NodeIndex;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Nodes to flush, in stack order, plus pending join-table operations keyed
/// by join-table name.
#[derive(Debug)]
pub struct FlushPlan {
    operation: Operation,
    pub(crate) stack: FlushStack<NodeIndex>,
    pub(crate) join_tables: BTreeMap<String, PendingJoinTable>,
}

impl FlushPlan {
    /// Walk the graph from its head along links eligible for `operation`.
    ///
    /// A node holding a foreign key is popped after the node it references.
    /// One-to-many children are popped after their parent. Self-referential
    /// and many-to-many links impose no order; owned many-to-many links of
    /// nodes with a pending write are recorded as join-table operations
    /// instead. Remove plans pop in reverse so referencing rows go first.
    pub fn build(graph: &ObjectGraph, operation: Operation) -> Self {
        let mut walk = Walk {
            graph,
            operation,
            planned: HashSet::new(),
            order: Vec::new(),
            join_tables: BTreeMap::new(),
        };
        if let Some(head) = graph.head() {
            walk.visit(head);
        }

        let mut stack = FlushStack::new();
        match operation {
            Operation::Remove => walk.order.iter().for_each(|&idx| stack.push(idx)),
            Operation::Persist | Operation::Merge => {
                walk.order.iter().rev().for_each(|&idx| stack.push(idx))
            }
        }

        debug!(
            "Planned {} flush: {} nodes, {} join tables",
            operation,
            stack.len(),
            walk.join_tables.len()
        );
        Self {
            operation,
            stack,
            join_tables: walk.join_tables,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Nodes left to flush.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty() && self.join_tables.is_empty()
    }

    /// Remaining nodes in the order they will be flushed.
    pub fn order(&self) -> Vec<NodeIndex> {
        self.stack.iter().copied().collect()
    }

    pub fn join_tables(&self) -> impl Iterator<Item = (&str, &PendingJoinTable)> {
        self.join_tables.iter().map(|(name, jt)| (name.as_str(), jt))
    }

    pub fn join_table(&self, name: &str) -> Option<&PendingJoinTable> {
        self.join_tables.get(name)
    }

    /// Drop all pending work.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.join_tables.clear();
    }
}

struct Walk<'g> {
    graph: &'g ObjectGraph,
    operation: Operation,
    planned: HashSet<NodeIndex>,
    order: Vec<NodeIndex>,
    join_tables: BTreeMap<String, PendingJoinTable>,
}

impl Walk<'_> {
    fn visit(&mut self, idx: NodeIndex) {
        if !self.planned.insert(idx) {
            return;
        }
        let Some(node) = self.graph.node(idx) else {
            return;
        };
        let cascade = self.operation.cascade_type();
        let join_operation = match self.operation {
            Operation::Remove => JoinTableOperation::Delete,
            Operation::Persist | Operation::Merge => JoinTableOperation::Insert,
        };
        let unit = node.persistence_unit().map(str::to_string);
        let writes = node.pending_action().is_some();

        // Removing an owner clears all of its join rows, linked or not
        if writes && self.operation == Operation::Remove {
            for relation in node.descriptor().relations.iter().filter(|r| r.owns_join_table()) {
                if let Some(ref join_table) = relation.join_table {
                    self.join_tables
                        .entry(join_table.table.clone())
                        .or_insert_with(|| {
                            PendingJoinTable::new(join_table.clone(), join_operation, unit.clone())
                        })
                        .add_owner(idx);
                }
            }
        }

        let mut dependencies = Vec::new();
        let mut dependents = Vec::new();
        for (edge, child) in self.graph.children(idx) {
            let Some(link) = self.graph.link(edge) else {
                continue;
            };

            if writes && link.owns_join_table() && join_operation == JoinTableOperation::Insert {
                if let Some(ref join_table) = link.join_table {
                    self.join_tables
                        .entry(join_table.table.clone())
                        .or_insert_with(|| {
                            PendingJoinTable::new(join_table.clone(), join_operation, unit.clone())
                        })
                        .add_pair(idx, child);
                }
            }

            if child == idx || !link.cascades(cascade) {
                continue;
            }
            if link.source_holds_key() && !link.self_referential {
                dependencies.push(child);
            } else {
                dependents.push(child);
            }
        }

        for child in dependencies {
            self.visit(child);
        }
        self.order.push(idx);
        for child in dependents {
            self.visit(child);
        }
    }
}
