// src/engine/core.rs

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::RunOptions;
use super::gc::GcPolicy;
use super::report::{DagVerdict, RunReport};
use super::run_log::{LogRecord, RunLog, now_ms};
use crate::dag::{Dag, DagState, FileEvent, FileId, FileState, NodeId, NodeState, Scheduler};
use crate::errors::{BatchdagError, Result};
use crate::exec::{BatchResult, BatchTask, SubmitOutcome, TaskId};
use crate::fs::FileSystem;
use crate::hooks::{HookDispatcher, LoopControl};

/// The synchronous heart of a run.
///
/// Owns the scheduler, the hooks and the run log, and decides every state
/// change. It never awaits: [`Runtime`](super::Runtime) feeds it executor
/// answers and asks it what to submit next. Tests drive it directly.
///
/// Veto handling per event:
/// - pre-run events (`create`, `dag_init`, `node_create`, `file_create`,
///   `dag_check`, `dag_start`): the run is rejected
/// - `node_check`: node skipped for this cycle
/// - `node_submit`, `batch_submit`, `file_expect`: failed submission
/// - `batch_retrieve`, `node_end`, `file_exist`, `node_success`: failed
///   execution
/// - `dag_end`: verdict becomes failed
/// - `node_fail`, `node_abort`, `dag_fail`, `dag_abort`, `destroy`: logged
#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) sched: Scheduler,
    pub(super) hooks: HookDispatcher,
    pub(super) fs: Arc<dyn FileSystem>,
    pub(super) gc: GcPolicy,
    run_log: Option<RunLog>,
    options: RunOptions,
    in_flight: HashMap<TaskId, NodeId>,
    /// Accepted submissions per node, indexed by `NodeId`.
    attempts: Vec<u32>,
    submitted: usize,
    vetoed_this_cycle: HashSet<NodeId>,
    /// Consecutive idle cycles kept alive only by vetoed ready nodes.
    vetoed_cycles: u32,
    stop_submitting: bool,
    aborted: bool,
}

impl CoreRuntime {
    pub fn new(
        dag: Dag,
        hooks: HookDispatcher,
        fs: Arc<dyn FileSystem>,
        options: RunOptions,
    ) -> Result<Self> {
        if options.max_running == 0 {
            return Err(BatchdagError::ConfigError(
                "max_running must be at least 1".to_string(),
            ));
        }

        let gc = GcPolicy::new(options.gc_mode, &options.gc_keep)?;
        let run_log = options
            .run_log
            .as_ref()
            .map(|path| RunLog::new(path.clone(), Arc::clone(&fs)));
        let attempts = vec![0; dag.nodes().len()];

        Ok(Self {
            sched: Scheduler::new(dag),
            hooks,
            fs,
            gc,
            run_log,
            options,
            in_flight: HashMap::new(),
            attempts,
            submitted: 0,
            vetoed_this_cycle: HashSet::new(),
            vetoed_cycles: 0,
            stop_submitting: false,
            aborted: false,
        })
    }

    pub fn dag(&self) -> &Dag {
        self.sched.dag()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn running(&self) -> usize {
        self.sched.running_count()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    // ---------------------------------------------------------------------
    // Pre-run
    // ---------------------------------------------------------------------

    /// Everything before the first submission: hook setup, checks, restore
    /// from the run log, input checks for whatever must still run, and
    /// queueing of the remaining nodes.
    pub fn prepare(&mut self) -> Result<()> {
        self.hooks.create()?;

        let dag = self.sched.dag();
        self.hooks.dag_init(dag)?;
        for node in dag.nodes() {
            self.hooks.node_create(dag, node)?;
        }
        for file in dag.files() {
            self.hooks.file_create(dag, file)?;
        }

        self.hooks.dag_check(dag)?;
        let restored = self.restore_from_log()?;
        self.check_sources()?;
        self.sched.dag_mut().set_state(DagState::Checked);

        self.hooks.dag_start(self.sched.dag())?;
        self.sched.dag_mut().set_state(DagState::Running);
        self.record_dag();

        let queued = self.sched.queue_created()?;
        info!(
            nodes = self.sched.dag().nodes().len(),
            files = self.sched.dag().files().len(),
            restored,
            queued = queued.len(),
            max_running = self.options.max_running,
            "dag started"
        );

        // Files left over by restored nodes may already be collectable.
        self.collect_garbage()?;
        Ok(())
    }

    /// Record a run that never started because a pre-run step failed.
    pub fn reject(&mut self, err: &BatchdagError) {
        error!(error = %err, "workflow rejected before submission");
        self.sched.dag_mut().set_state(DagState::Failed);
        self.record_dag();
    }

    /// Workflow inputs must be present before anything runs.
    ///
    /// Inputs read only by nodes restored from the run log may be gone;
    /// they are left in `CREATE`.
    fn check_sources(&mut self) -> Result<()> {
        let dag = self.sched.dag();
        let mut present = Vec::new();
        let mut missing = Vec::new();
        for file in dag.files().iter().filter(|f| f.is_source()) {
            let needed = file
                .consumers
                .iter()
                .any(|c| dag.node(*c).state != NodeState::Complete);
            if self.fs.exists(&file.path) {
                present.push(file.id);
            } else if needed {
                missing.push(file.path.display().to_string());
            } else {
                debug!(path = %file.path.display(), "input missing but not needed by this run");
            }
        }
        if !missing.is_empty() {
            return Err(BatchdagError::ConfigError(format!(
                "workflow input(s) not found: {}",
                missing.join(", ")
            )));
        }

        for id in present {
            let dag = self.sched.dag();
            self.hooks.file_exist(dag, dag.file(id))?;
            self.sched.apply_file(id, FileEvent::Exist)?;
        }
        Ok(())
    }

    /// Mark nodes that completed in an earlier run as `COMPLETE`.
    ///
    /// A node is restored when its last logged state is `COMPLETE`, its
    /// fingerprint is unchanged, and each output is either on disk or was
    /// logged as collected. Restoration is then withdrawn to a fixpoint:
    /// a node re-runs if any producer of its inputs re-runs, and a producer
    /// re-runs if a re-running node needs an output that is gone.
    fn restore_from_log(&mut self) -> Result<usize> {
        let Some(log) = &self.run_log else {
            return Ok(0);
        };
        let history = log.load()?;
        if history.is_empty() {
            return Ok(0);
        }
        info!(
            path = %log.path().display(),
            previous = ?history.last_dag_state(),
            "resuming from run log"
        );

        let dag = self.sched.dag();
        let mut restored: HashSet<NodeId> = dag
            .nodes()
            .iter()
            .filter(|n| {
                let Some(prev) = history.node(&n.name) else {
                    return false;
                };
                if prev.state != NodeState::Complete || prev.fingerprint != dag.fingerprint(n.id) {
                    return false;
                }
                n.outputs.iter().all(|f| {
                    let path = &dag.file(*f).path;
                    self.fs.exists(path) || history.file_state(path) == Some(FileState::Deleted)
                })
            })
            .map(|n| n.id)
            .collect();

        loop {
            let mut withdraw = Vec::new();
            for node in dag.nodes() {
                if restored.contains(&node.id) {
                    let upstream_reruns = node.inputs.iter().any(|f| {
                        dag.file(*f)
                            .producer
                            .is_some_and(|p| !restored.contains(&p))
                    });
                    if upstream_reruns {
                        withdraw.push(node.id);
                    }
                } else {
                    for f in &node.inputs {
                        let file = dag.file(*f);
                        if let Some(p) = file.producer {
                            if restored.contains(&p) && !self.fs.exists(&file.path) {
                                withdraw.push(p);
                            }
                        }
                    }
                }
            }

            if withdraw.is_empty() {
                break;
            }
            for id in withdraw {
                if restored.remove(&id) {
                    debug!(node = %dag.node(id).name, "completed node must run again");
                }
            }
        }

        let order: Vec<NodeId> = dag
            .nodes()
            .iter()
            .map(|n| n.id)
            .filter(|id| restored.contains(id))
            .collect();

        for &id in &order {
            for f in self.sched.dag().node(id).outputs.clone() {
                let dag = self.sched.dag();
                let file = dag.file(f);
                if self.fs.exists(&file.path) {
                    self.hooks.file_exist(dag, file)?;
                    self.sched.apply_file(f, FileEvent::Exist)?;
                } else {
                    self.sched.apply_file(f, FileEvent::Restore)?;
                }
            }
            self.sched.mark_restored(id)?;
            info!(node = %self.sched.dag().node(id).name, "node already complete; skipping");
        }

        Ok(order.len())
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    /// Start a scheduler iteration; `node_check` vetoes only last one cycle.
    pub fn begin_cycle(&mut self) {
        self.vetoed_this_cycle.clear();
    }

    /// Ready nodes in creation order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.sched.ready_nodes()
    }

    /// Room for another submission under the concurrency cap and policy.
    pub fn can_submit(&self) -> bool {
        !self.aborted
            && !self.stop_submitting
            && self.sched.running_count() < self.options.max_running
    }

    /// Run the pre-submission hooks for a ready node and build its task.
    ///
    /// `None` means nothing should be handed to the executor: the node was
    /// skipped by `node_check` or its submission failed.
    pub fn prepare_submission(&mut self, id: NodeId) -> Result<Option<BatchTask>> {
        let dag = self.sched.dag();
        let node = dag.node(id);

        if let Err(e) = self.hooks.node_check(dag, node) {
            info!(node = %node.name, reason = %e, "node skipped this cycle");
            self.vetoed_this_cycle.insert(id);
            return Ok(None);
        }

        let mut task = BatchTask {
            node: node.name.clone(),
            command: node.command.clone(),
            inputs: node.inputs.iter().map(|f| dag.file(*f).path.clone()).collect(),
            outputs: node.outputs.iter().map(|f| dag.file(*f).path.clone()).collect(),
            resources: node.resources,
            attempt: node.attempt(),
        };

        if let Err(e) = self.approve_submission(id, &mut task) {
            self.attempt_failed(id, None, e.to_string())?;
            return Ok(None);
        }
        Ok(Some(task))
    }

    fn approve_submission(&mut self, id: NodeId, task: &mut BatchTask) -> Result<()> {
        let dag = self.sched.dag();
        let node = dag.node(id);
        self.hooks.node_submit(dag, node, task)?;
        self.hooks.batch_submit(task)?;
        for f in &node.outputs {
            self.hooks.file_expect(dag, dag.file(*f))?;
        }
        Ok(())
    }

    /// Apply the executor's answer to a submission.
    pub fn submission_outcome(&mut self, id: NodeId, outcome: SubmitOutcome) -> Result<()> {
        match outcome {
            SubmitOutcome::Accepted(task_id) => {
                self.sched.mark_running(id)?;
                self.in_flight.insert(task_id, id);
                self.attempts[id.0] += 1;
                self.submitted += 1;

                let node = self.sched.dag().node(id);
                info!(node = %node.name, %task_id, attempt = node.attempt(), "node submitted");
                self.record_node(id);
                for f in self.sched.dag().node(id).outputs.clone() {
                    self.record_file(f);
                }
                Ok(())
            }
            SubmitOutcome::Rejected(reason) => {
                warn!(node = %self.sched.dag().node(id).name, %reason, "submission rejected");
                self.attempt_failed(id, None, format!("rejected by executor: {reason}"))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------------

    /// Consume one completion from the executor.
    pub fn handle_result(&mut self, mut result: BatchResult) -> Result<()> {
        let Some(id) = self.in_flight.remove(&result.task_id) else {
            debug!(task_id = %result.task_id, "completion for unknown task ignored");
            return Ok(());
        };

        if let Err(e) = self.hooks.batch_retrieve(&mut result) {
            return self.attempt_failed(id, result.exit_code(), e.to_string());
        }

        let dag = self.sched.dag();
        let node = dag.node(id);
        debug!(
            node = %node.name,
            task_id = %result.task_id,
            outcome = ?result.outcome,
            wall_ms = result.usage.wall_time.as_millis() as u64,
            "node finished"
        );

        if let Err(e) = self.hooks.node_end(dag, node, &result) {
            return self.attempt_failed(id, result.exit_code(), e.to_string());
        }

        if !result.succeeded() {
            return self.attempt_failed(id, result.exit_code(), result.failure_reason());
        }

        let missing: Vec<String> = node
            .outputs
            .iter()
            .map(|f| &dag.file(*f).path)
            .filter(|path| !self.fs.exists(path))
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            let reason = format!("missing output(s): {}", missing.join(", "));
            return self.attempt_failed(id, result.exit_code(), reason);
        }

        if let Err(e) = self.confirm_success(id, &result) {
            return self.attempt_failed(id, result.exit_code(), e.to_string());
        }

        let changed = self.sched.mark_complete(id, result.exit_code())?;
        info!(node = %self.sched.dag().node(id).name, "node complete");
        self.record_node(id);
        for f in changed {
            self.record_file(f);
        }
        Ok(())
    }

    fn confirm_success(&mut self, id: NodeId, result: &BatchResult) -> Result<()> {
        let dag = self.sched.dag();
        let node = dag.node(id);
        for f in &node.outputs {
            self.hooks.file_exist(dag, dag.file(*f))?;
        }
        self.hooks.node_success(dag, node, result)
    }

    /// A submission or execution attempt failed: retry or finalize.
    fn attempt_failed(&mut self, id: NodeId, exit_code: Option<i32>, reason: String) -> Result<()> {
        let state = self.sched.mark_failed_attempt(id, exit_code, reason.clone())?;

        let dag = self.sched.dag();
        let node = dag.node(id);
        if let Err(e) = self.hooks.node_fail(dag, node) {
            debug!(node = %node.name, error = %e, "node_fail veto ignored");
        }

        if state == NodeState::Waiting {
            warn!(
                node = %node.name,
                retry = node.retries,
                limit = node.retry_limit,
                %reason,
                "attempt failed; will retry"
            );
        } else {
            error!(node = %node.name, ?exit_code, %reason, "node failed permanently");
            if !self.options.keep_going && !self.stop_submitting {
                warn!("keep_going disabled; no further nodes will be submitted");
                self.stop_submitting = true;
            }
        }

        self.record_node(id);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Loop control, abort, finish
    // ---------------------------------------------------------------------

    /// Consult `dag_loop` and decide whether the scheduler loop goes on.
    pub fn keep_running(&mut self) -> bool {
        let control = self.hooks.dag_loop(self.sched.dag());

        if self.aborted {
            return false;
        }
        if self.sched.running_count() > 0 {
            self.vetoed_cycles = 0;
            return true;
        }
        if self.sched.unfinished().is_empty() || self.stop_submitting {
            return false;
        }
        if control == LoopControl::Continue {
            return true;
        }

        let ready = self.sched.ready_nodes();
        if ready.is_empty() {
            return false;
        }
        if ready.iter().any(|id| !self.vetoed_this_cycle.contains(id)) {
            self.vetoed_cycles = 0;
            return true;
        }

        // Everything ready was skipped by `node_check`; try again next cycle.
        self.vetoed_cycles += 1;
        let limit = self.options.max_vetoed_cycles;
        if limit > 0 && self.vetoed_cycles >= limit {
            warn!(
                cycles = self.vetoed_cycles,
                waiting = ready.len(),
                "ready nodes vetoed for too many cycles; giving up"
            );
            return false;
        }
        true
    }

    /// Move every unfinished node to `ABORTED`.
    ///
    /// Returns the in-flight tasks the caller should cancel.
    pub fn abort(&mut self) -> Result<Vec<TaskId>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        self.aborted = true;
        warn!(running = self.sched.running_count(), "abort requested");

        let mut tasks: Vec<TaskId> = self.in_flight.drain().map(|(task, _)| task).collect();
        tasks.sort();

        for id in self.sched.unfinished() {
            self.sched.mark_aborted(id)?;
            let dag = self.sched.dag();
            if let Err(e) = self.hooks.node_abort(dag, dag.node(id)) {
                debug!(error = %e, "node_abort veto ignored");
            }
            self.record_node(id);
        }
        Ok(tasks)
    }

    /// Decide the verdict, run the dag-level terminal hooks and build the
    /// report.
    pub fn finish(&mut self) -> RunReport {
        let mut verdict = if self.aborted {
            DagVerdict::Aborted
        } else if self.sched.all_complete() {
            DagVerdict::Complete
        } else {
            DagVerdict::Failed
        };

        let dag = self.sched.dag();
        if verdict == DagVerdict::Complete {
            if let Err(e) = self.hooks.dag_end(dag) {
                error!(error = %e, "dag_end vetoed; workflow marked failed");
                verdict = DagVerdict::Failed;
            }
        }
        if verdict == DagVerdict::Failed {
            if let Err(e) = self.hooks.dag_fail(dag) {
                warn!(error = %e, "dag_fail veto ignored");
            }
        }
        if verdict == DagVerdict::Aborted {
            if let Err(e) = self.hooks.dag_abort(dag) {
                warn!(error = %e, "dag_abort veto ignored");
            }
        }

        let state = match verdict {
            DagVerdict::Complete => DagState::End,
            DagVerdict::Failed => DagState::Failed,
            DagVerdict::Aborted => DagState::Aborted,
        };
        self.sched.dag_mut().set_state(state);
        self.record_dag();

        if let Err(e) = self.hooks.destroy(self.sched.dag()) {
            warn!(error = %e, "destroy veto ignored");
        }

        info!(%verdict, submitted = self.submitted, "workflow finished");
        RunReport::build(self.sched.dag(), verdict, &self.attempts, self.submitted)
    }

    // ---------------------------------------------------------------------
    // Clean mode
    // ---------------------------------------------------------------------

    /// Remove everything a run produces, plus the run log. Nothing is
    /// submitted. Returns the removed files.
    pub fn clean(&mut self) -> Result<Vec<PathBuf>> {
        self.hooks.create()?;
        let dag = self.sched.dag();
        self.hooks.dag_clean(dag)?;

        let mut removed = Vec::new();
        for file in dag.files().iter().filter(|f| !f.is_source()) {
            if self.fs.exists(&file.path) {
                self.fs.remove_file(&file.path)?;
                info!(path = %file.path.display(), "removed");
                removed.push(file.path.clone());
            }
        }

        if let Some(log) = &self.run_log {
            log.remove()?;
            info!(path = %log.path().display(), "run log removed");
        }

        if let Err(e) = self.hooks.destroy(dag) {
            warn!(error = %e, "destroy veto ignored");
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Run log
    // ---------------------------------------------------------------------

    fn record(&self, record: LogRecord) {
        if let Some(log) = &self.run_log {
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "failed to append to run log");
            }
        }
    }

    fn record_dag(&self) {
        self.record(LogRecord::Dag {
            state: self.sched.dag().state(),
            at_ms: now_ms(),
        });
    }

    fn record_node(&self, id: NodeId) {
        let dag = self.sched.dag();
        let node = dag.node(id);
        self.record(LogRecord::Node {
            node: node.name.clone(),
            state: node.state,
            fingerprint: dag.fingerprint(id),
            attempt: node.attempt(),
            exit_code: node.exit_code,
            at_ms: now_ms(),
        });
    }

    pub(super) fn record_file(&self, id: FileId) {
        let file = self.sched.dag().file(id);
        self.record(LogRecord::File {
            path: file.path.clone(),
            state: file.state,
            at_ms: now_ms(),
        });
    }
}
