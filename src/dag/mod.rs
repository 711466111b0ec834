// src/dag/mod.rs

//! DAG representation and state machines.
//!
//! - [`graph`] holds the arena of nodes and files plus dependency queries.
//! - [`node`] defines the node lifecycle and its transition table.
//! - [`file`] defines the file lifecycle and its transition table.
//! - [`scheduler`] applies transitions, readiness and needed-by bookkeeping.

pub mod file;
pub mod graph;
pub mod node;
pub mod scheduler;

pub use file::{DagFile, FileEvent, FileId, FileState};
pub use graph::{Dag, DagBuilder, DagState};
pub use node::{DagNode, NodeEvent, NodeId, NodeState};
pub use scheduler::Scheduler;
