//! Builds an [`ObjectGraph`] from a root record.

use crate::error::{PersistenceError, Result};
use crate::graph::{Node, NodeId, NodeLink, NodeState, ObjectGraph};
use crate::metadata::{EntityDescriptor, MetadataRegistry};
use crate::value::{Record, Related, Value};
use petgraph::stable_graph::NodeIndex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Walks a record's declared relations and produces the deduplicated,
/// cycle-safe graph of everything reachable from it.
///
/// Every related record gets a node and a link, so its key can be used as a
/// foreign key. Only links that carry at least one cascade type are
/// traversed further.
pub struct ObjectGraphBuilder<'a> {
    registry: &'a MetadataRegistry,
    initial_state: NodeState,
    graph: ObjectGraph,
    /// Nodes whose relations have been walked
    traversed: HashSet<NodeIndex>,
    next_pending: u64,
}

impl<'a> ObjectGraphBuilder<'a> {
    pub fn new(registry: &'a MetadataRegistry, initial_state: NodeState) -> Self {
        Self {
            registry,
            initial_state,
            graph: ObjectGraph::new(),
            traversed: HashSet::new(),
            next_pending: 0,
        }
    }

    pub fn build(mut self, root: &Record) -> Result<ObjectGraph> {
        let head = self.visit(root, true)?;
        self.graph.set_head(head);
        debug!(
            "Built object graph for {}: {} nodes, {} links",
            root.entity(),
            self.graph.node_count(),
            self.graph.link_count()
        );
        Ok(self.graph)
    }

    fn visit(&mut self, record: &Record, traverse: bool) -> Result<NodeIndex> {
        let descriptor = self.registry.entity(record.entity())?;
        let (id, key) = self.identify(&descriptor, record)?;

        let idx = match self.graph.index_of(&id) {
            Some(idx) => idx,
            None => self.graph.add_node(Node::new(
                id,
                key,
                record.clone(),
                Arc::clone(&descriptor),
                self.initial_state,
            )),
        };

        // Re-entering a walked identity links to it without walking again
        if !traverse || !self.traversed.insert(idx) {
            return Ok(idx);
        }

        for field in record.relations().keys() {
            if descriptor.relation(field).is_none() {
                return Err(PersistenceError::graph_construction(
                    &descriptor.name,
                    format!("'{}' is not a declared relation", field),
                ));
            }
        }

        for relation in &descriptor.relations {
            let Some(related) = record.related(&relation.field) else {
                continue;
            };
            if relation.kind.is_unary() && matches!(related, Related::Many(_)) {
                return Err(PersistenceError::graph_construction(
                    &descriptor.name,
                    format!("{} relation '{}' holds a collection", relation.kind, relation.field),
                ));
            }

            let self_referential = relation.target == descriptor.name;
            let walk = !relation.cascade.is_empty();
            for (ordinal, child) in related.records().enumerate() {
                if child.entity() != relation.target {
                    return Err(PersistenceError::graph_construction(
                        &descriptor.name,
                        format!(
                            "relation '{}' expects {} but holds {}",
                            relation.field,
                            relation.target,
                            child.entity()
                        ),
                    ));
                }
                let child_idx = self.visit(child, walk)?;
                self.graph.add_link(
                    idx,
                    child_idx,
                    NodeLink::from_relation(relation, ordinal, self_referential),
                );
            }
        }

        Ok(idx)
    }

    fn identify(&mut self, descriptor: &EntityDescriptor, record: &Record) -> Result<(NodeId, Value)> {
        match record.get(&descriptor.id_column) {
            Some(value) if !value.is_null() => NodeId::from_value(&descriptor.name, value)
                .map(|id| (id, value.clone()))
                .ok_or_else(|| {
                    PersistenceError::graph_construction(
                        &descriptor.name,
                        format!(
                            "identifier '{}' has unsupported type {}",
                            descriptor.id_column,
                            value.type_name()
                        ),
                    )
                }),
            _ if descriptor.is_generated_id() => {
                let id = NodeId::pending(&descriptor.name, self.next_pending);
                self.next_pending += 1;
                Ok((id, Value::Null))
            }
            _ => Err(PersistenceError::graph_construction(
                &descriptor.name,
                format!(
                    "identifier '{}' is missing and not generated",
                    descriptor.id_column
                ),
            )),
        }
    }
}
