// src/exec/task_runner.rs

//! Individual task process runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{BatchOutcome, BatchResult, BatchTask, ResourceUsage, TaskId};

/// Run a single task process and report exactly one [`BatchResult`].
///
/// - Spawn or wait errors are reported as `ExecutorError`.
/// - If the cancel channel fires, the child is killed and reported as
///   `Killed`.
pub async fn run_task(
    task_id: TaskId,
    task: BatchTask,
    workdir: Option<PathBuf>,
    done_tx: mpsc::UnboundedSender<BatchResult>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let node = task.node.clone();

    let outcome = match run_task_inner(task_id, task, workdir, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(node = %node, %task_id, error = %err, "task execution error");
            BatchOutcome::ExecutorError(format!("{err:#}"))
        }
    };

    let result = BatchResult {
        task_id,
        outcome,
        usage: ResourceUsage {
            wall_time: started.elapsed(),
        },
    };

    if done_tx.send(result).is_err() {
        debug!(node = %node, %task_id, "executor dropped; completion discarded");
    }
}

async fn run_task_inner(
    task_id: TaskId,
    task: BatchTask,
    workdir: Option<PathBuf>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<BatchOutcome> {
    info!(
        node = %task.node,
        %task_id,
        attempt = task.attempt,
        cmd = %task.command,
        "starting task process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&task.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&task.command);
        c
    };

    if let Some(dir) = &workdir {
        cmd.current_dir(dir);
    }

    cmd.stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for node '{}'", task.node))?;

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let node = task.node.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(node = %node, %task_id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of node '{}'", task.node))?;

            info!(
                node = %task.node,
                %task_id,
                exit_code = ?status.code(),
                success = status.success(),
                "task process exited"
            );

            Ok(match status.code() {
                Some(code) => BatchOutcome::Exited(code),
                None => BatchOutcome::Killed,
            })
        }

        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                info!(node = %task.node, %task_id, "cancellation requested; killing process");
            }
            if let Err(e) = child.kill().await {
                warn!(node = %task.node, %task_id, error = %e, "failed to kill child process");
            }
            Ok(BatchOutcome::Killed)
        }
    }
}
