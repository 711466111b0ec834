// src/engine/runtime.rs

use std::fmt;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::{Executor, SubmitOutcome};

use super::AbortHandle;
use super::core::CoreRuntime;
use super::report::RunReport;

/// Drives a [`CoreRuntime`] against an [`Executor`].
///
/// This is a pure IO shell: all run semantics live in the core. Each
/// iteration of the loop:
/// 1. checks the abort handle
/// 2. submits ready nodes up to the concurrency cap
/// 3. asks the core whether to keep going (this consults `dag_loop`)
/// 4. waits at most one poll interval for completions (an abort cuts the
///    wait short) and feeds them in
/// 5. runs garbage collection
pub struct Runtime<E: Executor> {
    core: CoreRuntime,
    executor: E,
    abort: AbortHandle,
}

impl<E: Executor> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: Executor> Runtime<E> {
    pub fn new(core: CoreRuntime, executor: E) -> Self {
        Self {
            core,
            executor,
            abort: AbortHandle::new(),
        }
    }

    /// Use an existing handle, e.g. one already wired to Ctrl-C.
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run the workflow to a terminal state.
    ///
    /// Returns `Err` only if the workflow was rejected before submission or
    /// the executor itself failed; node failures are reported in the
    /// [`RunReport`].
    pub async fn run(mut self) -> Result<RunReport> {
        if let Err(e) = self.core.prepare() {
            self.core.reject(&e);
            return Err(e);
        }

        info!("batchdag runtime started");
        let poll_interval = self.core.options().poll_interval;
        let mut abort_rx = self.abort.subscribe();

        loop {
            if self.abort.is_aborted() {
                self.abort_in_flight().await?;
                break;
            }

            self.submit_ready().await?;

            if !self.core.keep_running() {
                debug!("nothing left to wait for; stopping");
                break;
            }

            let results = tokio::select! {
                results = self.executor.poll(poll_interval) => results?,
                _ = abort_rx.changed() => continue,
            };
            for result in results {
                self.core.handle_result(result)?;
            }

            self.core.collect_garbage()?;
        }

        // An abort that raced the last iteration still counts.
        if self.abort.is_aborted() && !self.core.is_aborted() {
            self.abort_in_flight().await?;
        }

        info!("runtime exiting");
        Ok(self.core.finish())
    }

    async fn submit_ready(&mut self) -> Result<()> {
        self.core.begin_cycle();

        for id in self.core.ready_nodes() {
            if !self.core.can_submit() {
                break;
            }

            let Some(task) = self.core.prepare_submission(id)? else {
                continue;
            };

            let outcome = match self.executor.submit(task).await {
                Ok(outcome) => outcome,
                Err(e) => SubmitOutcome::Rejected(e.to_string()),
            };
            self.core.submission_outcome(id, outcome)?;
        }
        Ok(())
    }

    async fn abort_in_flight(&mut self) -> Result<()> {
        let tasks = self.core.abort()?;
        for task_id in tasks {
            if let Err(e) = self.executor.cancel(task_id).await {
                warn!(%task_id, error = %e, "failed to cancel task");
            }
        }
        Ok(())
    }
}
