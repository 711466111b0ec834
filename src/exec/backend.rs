// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The engine talks to an [`Executor`] instead of spawning processes itself.
//! Production uses [`LocalExecutor`](super::LocalExecutor); tests provide a
//! fake that records submissions and scripts completions.
//!
//! The contract is deliberately small:
//! - `submit` either accepts a task (returning its id) or rejects it
//! - `poll` waits at most `timeout` and returns every completion since the
//!   previous poll, possibly none
//! - `cancel` is best effort

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::types::Resources;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executor-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the engine hands to the executor for one attempt of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTask {
    pub node: String,
    pub command: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub resources: Resources,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(TaskId),
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Process exited with this status.
    Exited(i32),
    /// Terminated by a signal or by cancellation.
    Killed,
    ResourceExceeded(String),
    ExecutorError(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub wall_time: Duration,
}

/// One completion reported by [`Executor::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub task_id: TaskId,
    pub outcome: BatchOutcome,
    pub usage: ResourceUsage,
}

impl BatchResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == BatchOutcome::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            BatchOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Human-readable reason for an unsuccessful outcome.
    pub fn failure_reason(&self) -> String {
        match &self.outcome {
            BatchOutcome::Exited(code) => format!("exited with status {code}"),
            BatchOutcome::Killed => "killed".to_string(),
            BatchOutcome::ResourceExceeded(what) => format!("resource limit exceeded: {what}"),
            BatchOutcome::ExecutorError(msg) => format!("executor error: {msg}"),
        }
    }
}

/// Trait abstracting where and how tasks run.
pub trait Executor: Send {
    fn submit(&mut self, task: BatchTask) -> BoxFuture<'_, Result<SubmitOutcome>>;

    /// Wait up to `timeout` for completions.
    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, Result<Vec<BatchResult>>>;

    fn cancel(&mut self, task_id: TaskId) -> BoxFuture<'_, Result<()>>;
}
