use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchdag::engine::AbortHandle;
use batchdag::errors::Result;
use batchdag::exec::{
    BatchOutcome, BatchResult, BatchTask, BoxFuture, Executor, ResourceUsage, SubmitOutcome,
    TaskId,
};
use batchdag::fs::mock::MockFileSystem;

#[derive(Debug, Default)]
struct LogInner {
    submitted: Vec<String>,
    tasks: Vec<BatchTask>,
    rejected: Vec<String>,
    cancelled: Vec<TaskId>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Shared record of what a [`FakeExecutor`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<LogInner>>);

impl ExecutionLog {
    /// Node names of accepted submissions, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.0.lock().unwrap().submitted.clone()
    }

    pub fn tasks(&self) -> Vec<BatchTask> {
        self.0.lock().unwrap().tasks.clone()
    }

    pub fn rejected(&self) -> Vec<String> {
        self.0.lock().unwrap().rejected.clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.0.lock().unwrap().cancelled.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.0.lock().unwrap().max_in_flight
    }

    pub fn submissions_of(&self, node: &str) -> usize {
        self.submitted().iter().filter(|n| *n == node).count()
    }
}

/// A fake executor that:
/// - records which tasks were submitted
/// - completes every accepted task on the next `poll`, with a scripted exit
///   code per attempt (default 0)
/// - on exit 0, "writes" the task's outputs into a `MockFileSystem`
/// - can reject submissions, hold tasks forever, or fire an abort when a
///   given node is submitted
pub struct FakeExecutor {
    fs: MockFileSystem,
    exit_codes: HashMap<String, VecDeque<i32>>,
    rejections: HashMap<String, usize>,
    held_nodes: HashSet<String>,
    no_outputs: HashSet<String>,
    abort_on_submit: Option<(String, AbortHandle)>,
    next_id: u64,
    pending: Vec<(TaskId, BatchTask, i32)>,
    held: Vec<TaskId>,
    log: ExecutionLog,
}

impl FakeExecutor {
    pub fn new(fs: MockFileSystem) -> Self {
        Self {
            fs,
            exit_codes: HashMap::new(),
            rejections: HashMap::new(),
            held_nodes: HashSet::new(),
            no_outputs: HashSet::new(),
            abort_on_submit: None,
            next_id: 1,
            pending: Vec::new(),
            held: Vec::new(),
            log: ExecutionLog::default(),
        }
    }

    /// Exit codes for successive attempts of `node`; later attempts exit 0.
    pub fn exit_codes(mut self, node: &str, codes: &[i32]) -> Self {
        self.exit_codes
            .insert(node.to_string(), codes.iter().copied().collect());
        self
    }

    /// Always exit with `code`.
    pub fn always_fail(mut self, node: &str, code: i32) -> Self {
        self.exit_codes
            .insert(node.to_string(), std::iter::repeat_n(code, 64).collect());
        self
    }

    /// Reject the first `times` submissions of `node`.
    pub fn reject(mut self, node: &str, times: usize) -> Self {
        self.rejections.insert(node.to_string(), times);
        self
    }

    /// Accept `node` but never complete it.
    pub fn hold(mut self, node: &str) -> Self {
        self.held_nodes.insert(node.to_string());
        self
    }

    /// Exit 0 without producing outputs.
    pub fn skip_outputs(mut self, node: &str) -> Self {
        self.no_outputs.insert(node.to_string());
        self
    }

    pub fn abort_on_submit(mut self, node: &str, handle: AbortHandle) -> Self {
        self.abort_on_submit = Some((node.to_string(), handle));
        self
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

impl Executor for FakeExecutor {
    fn submit(&mut self, task: BatchTask) -> BoxFuture<'_, Result<SubmitOutcome>> {
        Box::pin(async move {
            if let Some(left) = self.rejections.get_mut(&task.node) {
                if *left > 0 {
                    *left -= 1;
                    self.log.0.lock().unwrap().rejected.push(task.node.clone());
                    return Ok(SubmitOutcome::Rejected("scripted rejection".to_string()));
                }
            }

            let id = TaskId(self.next_id);
            self.next_id += 1;

            {
                let mut log = self.log.0.lock().unwrap();
                log.submitted.push(task.node.clone());
                log.tasks.push(task.clone());
                log.in_flight += 1;
                log.max_in_flight = log.max_in_flight.max(log.in_flight);
            }

            if let Some((node, handle)) = &self.abort_on_submit {
                if *node == task.node {
                    handle.abort();
                }
            }

            if self.held_nodes.contains(&task.node) {
                self.held.push(id);
            } else {
                let code = self
                    .exit_codes
                    .get_mut(&task.node)
                    .and_then(|codes| codes.pop_front())
                    .unwrap_or(0);
                self.pending.push((id, task, code));
            }

            Ok(SubmitOutcome::Accepted(id))
        })
    }

    fn poll(&mut self, _timeout: Duration) -> BoxFuture<'_, Result<Vec<BatchResult>>> {
        Box::pin(async move {
            tokio::task::yield_now().await;

            let mut results = Vec::new();
            for (task_id, task, code) in self.pending.drain(..) {
                if code == 0 && !self.no_outputs.contains(&task.node) {
                    for output in &task.outputs {
                        self.fs.add_file(output, format!("written by {}", task.node));
                    }
                }
                results.push(BatchResult {
                    task_id,
                    outcome: BatchOutcome::Exited(code),
                    usage: ResourceUsage {
                        wall_time: Duration::from_millis(1),
                    },
                });
            }

            self.log.0.lock().unwrap().in_flight -= results.len();
            Ok(results)
        })
    }

    fn cancel(&mut self, task_id: TaskId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut log = self.log.0.lock().unwrap();
            log.cancelled.push(task_id);
            if let Some(pos) = self.held.iter().position(|id| *id == task_id) {
                self.held.remove(pos);
                log.in_flight -= 1;
            }
            Ok(())
        })
    }
}
