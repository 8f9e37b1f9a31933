//! Join-table rows collected by a flush plan.

use crate::graph::ObjectGraph;
use crate::metadata::JoinTable;
use crate::value::Value;
use petgraph::stable_graph::NodeIndex;
use std::collections::BTreeSet;
use std::fmt;

/// Write applied to a join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinTableOperation {
    Insert,
    Delete,
}

impl fmt::Display for JoinTableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinTableOperation::Insert => write!(f, "INSERT"),
            JoinTableOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Join-table rows handed to a backend client, keyed by stored key values.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTableData {
    pub join_table: JoinTable,
    pub operation: JoinTableOperation,
    rows: Vec<(Value, Value)>,
}

impl JoinTableData {
    pub fn new(join_table: JoinTable, operation: JoinTableOperation) -> Self {
        Self {
            join_table,
            operation,
            rows: Vec::new(),
        }
    }

    /// Add an (owner, inverse) row; duplicates are ignored.
    pub fn add_row(&mut self, owner: Value, inverse: Value) {
        let row = (owner, inverse);
        if !self.rows.contains(&row) {
            self.rows.push(row);
        }
    }

    pub fn rows(&self) -> &[(Value, Value)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Join-table operation recorded while planning, keyed by node index so that
/// generated keys can be resolved at execution time.
#[derive(Debug, Clone)]
pub struct PendingJoinTable {
    pub join_table: JoinTable,
    pub operation: JoinTableOperation,
    /// Persistence unit of the owning entity
    pub owner_unit: Option<String>,
    owners: BTreeSet<NodeIndex>,
    pairs: BTreeSet<(NodeIndex, NodeIndex)>,
    processed: bool,
}

impl PendingJoinTable {
    pub fn new(
        join_table: JoinTable,
        operation: JoinTableOperation,
        owner_unit: Option<String>,
    ) -> Self {
        Self {
            join_table,
            operation,
            owner_unit,
            owners: BTreeSet::new(),
            pairs: BTreeSet::new(),
            processed: false,
        }
    }

    pub fn add_owner(&mut self, owner: NodeIndex) {
        self.owners.insert(owner);
    }

    pub fn add_pair(&mut self, owner: NodeIndex, inverse: NodeIndex) {
        self.owners.insert(owner);
        self.pairs.insert((owner, inverse));
    }

    pub fn owners(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.owners.iter().copied()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Owner keys known so far (unresolved owners are left out).
    pub fn owner_keys(&self, graph: &ObjectGraph) -> Vec<Value> {
        self.owners
            .iter()
            .filter_map(|&idx| resolved_key(graph, idx))
            .collect()
    }

    /// Rows with both keys resolved, plus the number of pairs left out.
    pub fn resolve(&self, graph: &ObjectGraph) -> (JoinTableData, usize) {
        let mut data = JoinTableData::new(self.join_table.clone(), self.operation);
        let mut unresolved = 0;
        for &(owner, inverse) in &self.pairs {
            match (resolved_key(graph, owner), resolved_key(graph, inverse)) {
                (Some(owner), Some(inverse)) => data.add_row(owner, inverse),
                _ => unresolved += 1,
            }
        }
        (data, unresolved)
    }
}

fn resolved_key(graph: &ObjectGraph, idx: NodeIndex) -> Option<Value> {
    graph
        .node(idx)
        .map(|node| node.key().clone())
        .filter(|key| !key.is_null())
}
