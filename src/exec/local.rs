// src/exec/local.rs

//! Executor that runs every task as a local `sh -c` process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::backend::{BatchResult, BatchTask, BoxFuture, Executor, SubmitOutcome, TaskId};
use super::task_runner::run_task;
use crate::errors::Result;

/// Local process executor.
///
/// Each accepted task is spawned on the tokio runtime; completions come back
/// over an unbounded channel and are handed out by [`Executor::poll`].
#[derive(Debug)]
pub struct LocalExecutor {
    workdir: Option<PathBuf>,
    next_id: u64,
    cancels: HashMap<TaskId, oneshot::Sender<()>>,
    done_tx: mpsc::UnboundedSender<BatchResult>,
    done_rx: mpsc::UnboundedReceiver<BatchResult>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            workdir: None,
            next_id: 1,
            cancels: HashMap::new(),
            done_tx,
            done_rx,
        }
    }

    /// Run commands from `dir` instead of the current directory.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn in_flight(&self) -> usize {
        self.cancels.len()
    }

    fn finish(&mut self, result: &BatchResult) {
        self.cancels.remove(&result.task_id);
    }
}

impl Executor for LocalExecutor {
    fn submit(&mut self, task: BatchTask) -> BoxFuture<'_, Result<SubmitOutcome>> {
        Box::pin(async move {
            if task.command.trim().is_empty() {
                return Ok(SubmitOutcome::Rejected("empty command".to_string()));
            }

            let task_id = TaskId(self.next_id);
            self.next_id += 1;

            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.cancels.insert(task_id, cancel_tx);

            tokio::spawn(run_task(
                task_id,
                task,
                self.workdir.clone(),
                self.done_tx.clone(),
                cancel_rx,
            ));

            Ok(SubmitOutcome::Accepted(task_id))
        })
    }

    fn poll(&mut self, timeout: Duration) -> BoxFuture<'_, Result<Vec<BatchResult>>> {
        Box::pin(async move {
            let mut results = Vec::new();

            if self.cancels.is_empty() {
                // Nothing in flight; still honour the bounded wait so callers
                // don't spin.
                tokio::time::sleep(timeout).await;
            } else if let Ok(Some(first)) =
                tokio::time::timeout(timeout, self.done_rx.recv()).await
            {
                results.push(first);
            }

            while let Ok(next) = self.done_rx.try_recv() {
                results.push(next);
            }

            for result in &results {
                self.finish(result);
            }

            if !results.is_empty() {
                debug!(count = results.len(), "collected task completions");
            }
            Ok(results)
        })
    }

    fn cancel(&mut self, task_id: TaskId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(tx) = self.cancels.remove(&task_id) {
                debug!(%task_id, "cancelling task");
                let _ = tx.send(());
            }
            Ok(())
        })
    }
}
