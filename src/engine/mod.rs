// src/engine/mod.rs

//! Orchestration engine for batchdag.
//!
//! This module ties together:
//! - the DAG scheduler (node and file state machines)
//! - the hook dispatcher
//! - garbage collection of intermediate files
//! - the run log used for restart
//! - the executor loop: submit ready nodes, poll for completions, repeat
//!
//! All run semantics live in the synchronous [`core`]; the async/IO shell
//! that talks to the executor is implemented in [`runtime`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::default_run_log_path;
use crate::config::model::ConfigFile;
use crate::types::GcMode;

pub mod core;
pub mod gc;
pub mod report;
pub mod run_log;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use gc::GcPolicy;
pub use report::{DagVerdict, FileReport, NodeReport, RunReport};
pub use run_log::{LogRecord, RunHistory, RunLog};
pub use runtime::Runtime;

/// Run-wide knobs, resolved from `[config]` / `[gc]` plus CLI overrides.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum simultaneously `RUNNING` nodes (>= 1).
    pub max_running: usize,
    /// Upper bound on a single executor wait.
    pub poll_interval: Duration,
    /// Keep submitting independent work after a permanent failure.
    pub keep_going: bool,
    /// Give up after this many consecutive cycles with nothing running and
    /// every ready node vetoed by `node_check`. `0` means never.
    pub max_vetoed_cycles: u32,
    pub gc_mode: GcMode,
    /// Globs for files that are never collected.
    pub gc_keep: Vec<String>,
    /// `None` disables the run log (and restart).
    pub run_log: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_running: 1,
            poll_interval: Duration::from_millis(500),
            keep_going: true,
            max_vetoed_cycles: 120,
            gc_mode: GcMode::RefCount,
            gc_keep: Vec::new(),
            run_log: None,
        }
    }
}

impl RunOptions {
    /// Options for the workflow loaded from `workflow_path`.
    pub fn from_config(cfg: &ConfigFile, workflow_path: &Path) -> Self {
        let run_log = match &cfg.config.run_log {
            Some(path) => PathBuf::from(path),
            None => default_run_log_path(workflow_path),
        };

        Self {
            max_running: cfg.config.effective_max_running(),
            poll_interval: Duration::from_millis(cfg.config.poll_interval_ms),
            keep_going: cfg.config.keep_going,
            max_vetoed_cycles: cfg.config.max_vetoed_cycles,
            gc_mode: cfg.gc.mode,
            gc_keep: cfg.gc.keep.clone(),
            run_log: Some(run_log),
        }
    }
}

/// Cloneable handle used to request an abort of a running DAG.
///
/// The scheduler loop checks it at the top of every iteration and also
/// wakes from an executor wait as soon as an abort is requested.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that resolves `changed()` when an abort is requested.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    #[test]
    fn abort_handle_is_shared_between_clones() {
        let handle = AbortHandle::new();
        let other = handle.clone();
        assert!(!other.is_aborted());
        handle.abort();
        assert!(other.is_aborted());
    }

    #[tokio::test]
    async fn subscribers_wake_on_abort() {
        let handle = AbortHandle::new();
        let mut rx = handle.subscribe();
        let other = handle.clone();
        tokio::spawn(async move { other.abort() });

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[test]
    fn options_default_run_log_next_to_workflow() {
        let raw = load_from_str(
            r#"
            [config]
            max_running = 3
            keep_going = false

            [node.a]
            command = "true"
            outputs = ["out"]
            "#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();

        let opts = RunOptions::from_config(&cfg, Path::new("wf/Batchdag.toml"));
        assert_eq!(opts.max_running, 3);
        assert!(!opts.keep_going);
        assert_eq!(opts.max_vetoed_cycles, 120);
        assert_eq!(opts.poll_interval, Duration::from_millis(500));
        assert_eq!(opts.run_log, Some(PathBuf::from("wf/Batchdag.toml.batchlog")));
    }
}
