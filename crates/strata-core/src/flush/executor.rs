//! Drains a flush plan against backend clients.

use crate::client::ClientMap;
use crate::error::{PersistenceError, Result};
use crate::flush::join_table::{JoinTableOperation, PendingJoinTable};
use crate::flush::plan::FlushPlan;
use crate::graph::{FlushAction, NodeId, NodeState, ObjectGraph};
use petgraph::stable_graph::NodeIndex;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Outcome of one plan execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Identities written, in write order, with the action applied
    pub written: Vec<(NodeId, FlushAction)>,
    /// Nodes popped in a state that never reaches the backend
    pub skipped: usize,
    /// Rows re-written to fill foreign keys of rows inserted after them
    pub patched: usize,
    /// Join-table rows inserted or deleted
    pub join_rows: usize,
    /// Join-table operations that failed and were skipped
    pub join_failures: usize,
    /// Join tables processed, by name
    pub join_tables: Vec<String>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.join_rows == 0
    }

    /// Whether `id` was written with `action`.
    pub fn wrote(&self, id: &NodeId, action: FlushAction) -> bool {
        self.written.iter().any(|(w, a)| w == id && *a == action)
    }
}

/// Executes flush plans with the clients of one entity manager.
pub struct FlushExecutor<'a> {
    clients: &'a ClientMap,
}

impl<'a> FlushExecutor<'a> {
    pub fn new(clients: &'a ClientMap) -> Self {
        Self { clients }
    }

    /// Pop and write every node of `plan`, then patch rows whose foreign
    /// keys pointed at later inserts and run the pending join-table
    /// operations.
    ///
    /// A node write failure stops execution with [`PersistenceError::Flush`];
    /// nodes written before it stay written. Join-table failures are logged
    /// and skipped, and the pending join tables are cleared either way.
    pub fn execute(&self, plan: &mut FlushPlan, graph: &mut ObjectGraph) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let mut deferred = Vec::new();

        while let Some(idx) = plan.stack.pop() {
            if let Some(action) = self.flush_node(idx, graph, &mut report, &mut deferred)? {
                graph.complete_flush(idx);
                if let Some(node) = graph.node(idx) {
                    trace!("Flushed {} ({:?})", node.id(), action);
                    report.written.push((node.id().clone(), action));
                }
            }
        }

        for idx in deferred {
            self.patch_references(idx, graph, &mut report)?;
        }

        let join_tables = std::mem::take(&mut plan.join_tables);
        self.flush_join_tables(join_tables, graph, &mut report);

        debug!(
            "Flushed {} plan: {} writes, {} patches, {} join rows",
            plan.operation(),
            report.written.len(),
            report.patched,
            report.join_rows
        );
        Ok(report)
    }

    fn flush_node(
        &self,
        idx: NodeIndex,
        graph: &mut ObjectGraph,
        report: &mut FlushReport,
        deferred: &mut Vec<NodeIndex>,
    ) -> Result<Option<FlushAction>> {
        let Some(node) = graph.node(idx) else {
            return Ok(None);
        };
        match node.state() {
            NodeState::Transient | NodeState::Detached => {
                warn!("Skipping flush of {} in state {}", node.id(), node.state());
                report.skipped += 1;
                return Ok(None);
            }
            NodeState::Managed | NodeState::Removed => {}
        }
        let Some(action) = node.pending_action() else {
            return Ok(None);
        };

        let id = node.id().clone();
        let key = node.key().clone();
        let descriptor = node.descriptor().clone();
        let client = self.clients.for_entity(&descriptor)?;

        match action {
            FlushAction::Insert => {
                let Some(prepared) = graph.row_for(idx) else {
                    return Ok(None);
                };
                let stored = client
                    .persist(&descriptor, &prepared.row)
                    .map_err(|e| PersistenceError::flush(id, e))?;
                if !stored.is_null() {
                    graph.resolve_key(idx, stored);
                }
                if prepared.needs_patch {
                    deferred.push(idx);
                }
            }
            FlushAction::Update => {
                let Some(prepared) = graph.row_for(idx) else {
                    return Ok(None);
                };
                client
                    .merge(&descriptor, &key, &prepared.row)
                    .map_err(|e| PersistenceError::flush(id, e))?;
                if prepared.needs_patch {
                    deferred.push(idx);
                }
            }
            FlushAction::Delete => {
                if key.is_null() {
                    trace!("{} was never stored, nothing to delete", id);
                    return Ok(None);
                }
                client
                    .remove(&descriptor, &key)
                    .map_err(|e| PersistenceError::flush(id, e))?;
            }
        }
        Ok(Some(action))
    }

    fn patch_references(
        &self,
        idx: NodeIndex,
        graph: &ObjectGraph,
        report: &mut FlushReport,
    ) -> Result<()> {
        let (Some(node), Some(prepared)) = (graph.node(idx), graph.row_for(idx)) else {
            return Ok(());
        };
        if prepared.needs_patch {
            warn!("Foreign keys of {} are still unresolved after flush", node.id());
            return Ok(());
        }
        let client = self.clients.for_entity(node.descriptor())?;
        client
            .merge(node.descriptor(), node.key(), &prepared.row)
            .map_err(|e| PersistenceError::flush(node.id().clone(), e))?;
        trace!("Patched foreign keys of {}", node.id());
        report.patched += 1;
        Ok(())
    }

    fn flush_join_tables(
        &self,
        join_tables: BTreeMap<String, PendingJoinTable>,
        graph: &ObjectGraph,
        report: &mut FlushReport,
    ) {
        for (name, mut pending) in join_tables {
            let client = match self.clients.resolve(pending.owner_unit.as_deref()) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Skipping join table {}: {}", name, e);
                    report.join_failures += 1;
                    continue;
                }
            };

            match pending.operation {
                JoinTableOperation::Insert => {
                    let (data, unresolved) = pending.resolve(graph);
                    if unresolved > 0 {
                        warn!("{} rows of join table {} have unresolved keys", unresolved, name);
                    }
                    if !data.is_empty() {
                        match client.persist_join_table(&data) {
                            Ok(()) => report.join_rows += data.len(),
                            Err(e) => {
                                warn!("{} on join table {} failed: {}", data.operation, name, e);
                                report.join_failures += 1;
                            }
                        }
                    }
                }
                JoinTableOperation::Delete => {
                    let join_column = &pending.join_table.join_column;
                    for owner in pending.owner_keys(graph) {
                        match client.delete_by_column(&name, join_column, &owner) {
                            Ok(deleted) => report.join_rows += deleted,
                            Err(e) => {
                                warn!("DELETE on join table {} for {} failed: {}", name, owner, e);
                                report.join_failures += 1;
                            }
                        }
                    }
                }
            }

            pending.mark_processed();
            report.join_tables.push(name);
        }
    }
}
