//! Node state machine.
//!
//! Transitions only check preconditions and record the pending backend write;
//! they never perform I/O.

use crate::error::{PersistenceError, Result};
use crate::graph::node::{FlushAction, Node, NodeState};
use crate::metadata::CascadeType;
use std::fmt;

/// Entity manager operation driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Persist,
    Merge,
    Remove,
}

impl Operation {
    pub fn cascade_type(&self) -> CascadeType {
        match self {
            Operation::Persist => CascadeType::Persist,
            Operation::Merge => CascadeType::Merge,
            Operation::Remove => CascadeType::Remove,
        }
    }

    /// Initial state of graph nodes built for this operation.
    pub fn initial_state(&self) -> NodeState {
        match self {
            Operation::Persist => NodeState::Transient,
            Operation::Merge | Operation::Remove => NodeState::Managed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Persist => "persist",
            Operation::Merge => "merge",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Node {
    /// Apply the transition for `operation`.
    pub fn apply(&mut self, operation: Operation) -> Result<()> {
        match operation {
            Operation::Persist => self.persist(),
            Operation::Merge => self.merge(),
            Operation::Remove => self.remove(),
        }
    }

    pub fn persist(&mut self) -> Result<()> {
        match self.state() {
            NodeState::Transient => {
                self.set_state(NodeState::Managed);
                self.set_action(Some(FlushAction::Insert));
                Ok(())
            }
            NodeState::Managed => Ok(()),
            state @ (NodeState::Removed | NodeState::Detached) => Err(
                PersistenceError::invalid_state(self.id().clone(), state, Operation::Persist),
            ),
        }
    }

    pub fn merge(&mut self) -> Result<()> {
        match self.state() {
            NodeState::Removed => Err(PersistenceError::invalid_state(
                self.id().clone(),
                NodeState::Removed,
                Operation::Merge,
            )),
            NodeState::Transient => {
                self.set_state(NodeState::Managed);
                self.set_action(Some(FlushAction::Insert));
                Ok(())
            }
            NodeState::Managed | NodeState::Detached => {
                self.set_state(NodeState::Managed);
                // A node whose key is still pending was never stored
                let action = if self.id().is_pending()
                    || self.pending_action() == Some(FlushAction::Insert)
                {
                    FlushAction::Insert
                } else {
                    FlushAction::Update
                };
                self.set_action(Some(action));
                Ok(())
            }
        }
    }

    pub fn remove(&mut self) -> Result<()> {
        match self.state() {
            NodeState::Managed => {
                self.set_state(NodeState::Removed);
                self.set_action(Some(FlushAction::Delete));
                Ok(())
            }
            NodeState::Transient | NodeState::Removed => Ok(()),
            NodeState::Detached => Err(PersistenceError::invalid_state(
                self.id().clone(),
                NodeState::Detached,
                Operation::Remove,
            )),
        }
    }

    /// Stop tracking the node.
    pub fn detach(&mut self) {
        self.set_state(NodeState::Detached);
        self.set_action(None);
    }
}
