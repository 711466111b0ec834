// src/dag/node.rs

//! Nodes and the node lifecycle.
//!
//! ```text
//! CREATED -> WAITING -> RUNNING -> COMPLETE
//!               ^          |
//!               +- retry --+-----> FAILED
//! any non-terminal ---- abort ---> ABORTED
//! ```
//!
//! Transitions are driven by [`NodeState::on`], a plain `state x event`
//! table. The retry counter is the only extra data: it decides whether a
//! failure is reported as [`NodeEvent::Retry`] or [`NodeEvent::Fail`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dag::FileId;
use crate::errors::{BatchdagError, Result};
use crate::types::Resources;

/// Index of a node in the [`Dag`](crate::dag::Dag) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Created,
    Waiting,
    Running,
    Complete,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Run started; node now waits for its inputs.
    Queue,
    /// Run log shows the node already completed with identical inputs.
    Restore,
    /// Executor accepted the task.
    Submit,
    Succeed,
    /// Submission or execution failed with retry budget left.
    Retry,
    /// Submission or execution failed with no retry budget left.
    Fail,
    Abort,
}

impl NodeState {
    /// The node transition table. `None` means the event is not valid here.
    pub fn on(self, event: NodeEvent) -> Option<NodeState> {
        use NodeEvent as E;
        use NodeState as S;

        match (self, event) {
            (S::Created, E::Queue) => Some(S::Waiting),
            (S::Created, E::Restore) => Some(S::Complete),
            (S::Waiting, E::Submit) => Some(S::Running),
            // Submission rejected before the node ever ran.
            (S::Waiting, E::Retry) => Some(S::Waiting),
            (S::Waiting, E::Fail) => Some(S::Failed),
            (S::Running, E::Succeed) => Some(S::Complete),
            (S::Running, E::Retry) => Some(S::Waiting),
            (S::Running, E::Fail) => Some(S::Failed),
            (S::Created | S::Waiting | S::Running, E::Abort) => Some(S::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Complete | NodeState::Failed | NodeState::Aborted)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "CREATED",
            NodeState::Waiting => "WAITING",
            NodeState::Running => "RUNNING",
            NodeState::Complete => "COMPLETE",
            NodeState::Failed => "FAILED",
            NodeState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// A single task in the workflow.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: NodeId,
    pub name: String,
    pub command: String,
    pub inputs: Vec<FileId>,
    pub outputs: Vec<FileId>,
    pub resources: Resources,
    pub retry_limit: u32,
    /// Retries consumed so far.
    pub retries: u32,
    pub state: NodeState,
    /// Exit code of the most recent attempt, if the executor reported one.
    pub exit_code: Option<i32>,
    /// Why the most recent attempt failed.
    pub failure: Option<String>,
}

impl DagNode {
    pub(crate) fn new(
        id: NodeId,
        name: String,
        command: String,
        resources: Resources,
        retry_limit: u32,
    ) -> Self {
        Self {
            id,
            name,
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            resources,
            retry_limit,
            retries: 0,
            state: NodeState::Created,
            exit_code: None,
            failure: None,
        }
    }

    /// Which event a failure of the current attempt maps to.
    pub fn failure_event(&self) -> NodeEvent {
        if self.retries < self.retry_limit {
            NodeEvent::Retry
        } else {
            NodeEvent::Fail
        }
    }

    /// Number of attempts made (or in flight) so far.
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    /// Apply `event`, returning the new state.
    pub fn apply(&mut self, event: NodeEvent) -> Result<NodeState> {
        let next = self
            .state
            .on(event)
            .ok_or_else(|| BatchdagError::InvalidTransition {
                subject: format!("node '{}'", self.name),
                from: self.state.to_string(),
                event: format!("{event:?}"),
            })?;

        if event == NodeEvent::Retry {
            if self.retries >= self.retry_limit {
                return Err(BatchdagError::InvalidTransition {
                    subject: format!("node '{}'", self.name),
                    from: self.state.to_string(),
                    event: format!("Retry (limit {} reached)", self.retry_limit),
                });
            }
            self.retries += 1;
        }

        self.state = next;
        Ok(next)
    }
}
