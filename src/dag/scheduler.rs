// src/dag/scheduler.rs

use tracing::{debug, warn};

use crate::dag::file::{FileEvent, FileId, FileState};
use crate::dag::graph::Dag;
use crate::dag::node::{NodeEvent, NodeId, NodeState};
use crate::errors::Result;

/// Scheduler holds the DAG and owns every node and file state change.
///
/// It is responsible for:
/// - deciding which `WAITING` nodes are ready (all inputs available)
/// - moving nodes through their lifecycle, including retry bookkeeping
/// - keeping output files in step with their producer
/// - maintaining each file's needed-by count as consumers finish
///
/// It knows nothing about hooks, executors or storage; callers in
/// `engine::core` decide *when* a transition happens, this type makes sure
/// it is a legal one and updates everything that depends on it.
#[derive(Debug)]
pub struct Scheduler {
    dag: Dag,
}

impl Scheduler {
    pub fn new(dag: Dag) -> Self {
        Self { dag }
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub(crate) fn dag_mut(&mut self) -> &mut Dag {
        &mut self.dag
    }

    /// Move every `CREATED` node to `WAITING`.
    pub fn queue_created(&mut self) -> Result<Vec<NodeId>> {
        let created: Vec<NodeId> = self
            .dag
            .nodes()
            .iter()
            .filter(|n| n.state == NodeState::Created)
            .map(|n| n.id)
            .collect();

        for id in &created {
            self.dag.node_mut(*id).apply(NodeEvent::Queue)?;
        }
        Ok(created)
    }

    /// `WAITING` with every input in `EXIST` or `COMPLETE`.
    pub fn is_ready(&self, id: NodeId) -> bool {
        let node = self.dag.node(id);
        node.state == NodeState::Waiting
            && node
                .inputs
                .iter()
                .all(|f| self.dag.file(*f).state.is_available())
    }

    /// All ready nodes, in creation order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.dag
            .nodes()
            .iter()
            .filter(|n| self.is_ready(n.id))
            .map(|n| n.id)
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.count_in(NodeState::Running)
    }

    pub fn count_in(&self, state: NodeState) -> usize {
        self.dag.nodes().iter().filter(|n| n.state == state).count()
    }

    pub fn all_complete(&self) -> bool {
        self.dag
            .nodes()
            .iter()
            .all(|n| n.state == NodeState::Complete)
    }

    pub fn any_failed(&self) -> bool {
        self.count_in(NodeState::Failed) > 0
    }

    /// Nodes not yet in a terminal state.
    pub fn unfinished(&self) -> Vec<NodeId> {
        self.dag
            .nodes()
            .iter()
            .filter(|n| !n.state.is_terminal())
            .map(|n| n.id)
            .collect()
    }

    /// Executor accepted the node: `WAITING -> RUNNING`, outputs `EXPECT`.
    pub fn mark_running(&mut self, id: NodeId) -> Result<()> {
        self.dag.node_mut(id).apply(NodeEvent::Submit)?;
        for file in self.dag.node(id).outputs.clone() {
            if self.dag.file(file).state == FileState::Create {
                self.dag.file_mut(file).apply(FileEvent::Expect)?;
            }
        }
        debug!(node = %self.dag.node(id).name, "node RUNNING");
        Ok(())
    }

    /// `RUNNING -> COMPLETE`: outputs `EXIST`, inputs released.
    ///
    /// Returns the outputs that changed state.
    pub fn mark_complete(&mut self, id: NodeId, exit_code: Option<i32>) -> Result<Vec<FileId>> {
        {
            let node = self.dag.node_mut(id);
            node.apply(NodeEvent::Succeed)?;
            node.exit_code = exit_code;
            node.failure = None;
        }

        let mut changed = Vec::new();
        for file in self.dag.node(id).outputs.clone() {
            if self.dag.file(file).state.on(FileEvent::Exist).is_some() {
                self.dag.file_mut(file).apply(FileEvent::Exist)?;
                changed.push(file);
            }
        }

        self.release_inputs(id);
        debug!(node = %self.dag.node(id).name, "node COMPLETE");
        Ok(changed)
    }

    /// Record a failed submission or execution.
    ///
    /// With retry budget left the node goes back to `WAITING` and its retry
    /// counter increments; otherwise it is finalized as `FAILED`. Returns the
    /// resulting state.
    pub fn mark_failed_attempt(
        &mut self,
        id: NodeId,
        exit_code: Option<i32>,
        reason: impl Into<String>,
    ) -> Result<NodeState> {
        let state = {
            let node = self.dag.node_mut(id);
            let event = node.failure_event();
            node.exit_code = exit_code;
            node.failure = Some(reason.into());
            node.apply(event)?
        };

        self.reset_expected_outputs(id)?;
        if state == NodeState::Failed {
            self.release_inputs(id);
        }
        Ok(state)
    }

    /// Any non-terminal state -> `ABORTED`.
    pub fn mark_aborted(&mut self, id: NodeId) -> Result<()> {
        self.dag.node_mut(id).apply(NodeEvent::Abort)?;
        self.reset_expected_outputs(id)?;
        self.release_inputs(id);
        Ok(())
    }

    /// `CREATED -> COMPLETE` for a node that finished in an earlier run.
    ///
    /// Output file states are set by the caller, which knows what is on disk.
    pub fn mark_restored(&mut self, id: NodeId) -> Result<()> {
        self.dag.node_mut(id).apply(NodeEvent::Restore)?;
        self.release_inputs(id);
        Ok(())
    }

    /// Apply a file event; convenience for callers outside the dag module.
    pub fn apply_file(&mut self, id: FileId, event: FileEvent) -> Result<FileState> {
        self.dag.file_mut(id).apply(event)
    }

    pub(crate) fn set_retained(&mut self, id: FileId) {
        self.dag.file_mut(id).retained = true;
    }

    /// Files still `EXIST` that no remaining node needs.
    ///
    /// A file qualifies once it has at least one consumer, its needed-by
    /// count is zero, and its producer (if any) and every consumer are
    /// terminal. Retained files are skipped.
    pub fn files_no_longer_needed(&self) -> Vec<FileId> {
        self.dag
            .files()
            .iter()
            .filter(|f| {
                f.state == FileState::Exist
                    && !f.retained
                    && !f.consumers.is_empty()
                    && f.needed_by == 0
                    && f.producer
                        .map(|p| self.dag.node(p).state.is_terminal())
                        .unwrap_or(true)
                    && f.consumers
                        .iter()
                        .all(|c| self.dag.node(*c).state.is_terminal())
            })
            .map(|f| f.id)
            .collect()
    }

    fn reset_expected_outputs(&mut self, id: NodeId) -> Result<()> {
        for file in self.dag.node(id).outputs.clone() {
            if self.dag.file(file).state == FileState::Expect {
                self.dag.file_mut(file).apply(FileEvent::Reset)?;
            }
        }
        Ok(())
    }

    /// The node reached a terminal state: it no longer needs its inputs.
    fn release_inputs(&mut self, id: NodeId) {
        for file in self.dag.node(id).inputs.clone() {
            let f = self.dag.file_mut(file);
            match f.needed_by.checked_sub(1) {
                Some(n) => f.needed_by = n,
                None => warn!(path = %f.path.display(), "needed-by count already zero"),
            }
        }
    }
}
