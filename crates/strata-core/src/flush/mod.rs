//! Flush planning and execution.
//!
//! A [`FlushPlan`] orders the nodes of an object graph so that every row
//! referenced by a foreign key is written before the row holding it, and
//! collects the join-table rows of owned many-to-many relations. The
//! [`FlushExecutor`] drains the plan against the resolved clients.

mod executor;
mod join_table;
mod plan;
mod stack;

pub use executor::{FlushExecutor, FlushReport};
pub use join_table::{JoinTableData, JoinTableOperation, PendingJoinTable};
pub use plan::FlushPlan;
pub use stack::FlushStack;
