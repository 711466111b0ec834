// src/engine/run_log.rs

//! Append-only run log used for restart.
//!
//! One JSON object per line:
//!
//! ```text
//! {"kind":"dag","state":"RUNNING","at_ms":1718000000000}
//! {"kind":"node","node":"align","state":"COMPLETE","fingerprint":"9f..","attempt":1,"exit_code":0,"at_ms":..}
//! {"kind":"file","path":"out.sam","state":"DELETED","at_ms":..}
//! ```
//!
//! Only the last record per node and per file matters when the log is read
//! back. Lines that fail to parse (e.g. a torn final write) are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dag::{DagState, FileState, NodeState};
use crate::errors::{BatchdagError, Result};
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Dag {
        state: DagState,
        at_ms: u64,
    },
    Node {
        node: String,
        state: NodeState,
        fingerprint: String,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        at_ms: u64,
    },
    File {
        path: PathBuf,
        state: FileState,
        at_ms: u64,
    },
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Last known state of one node in a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHistory {
    pub state: NodeState,
    pub fingerprint: String,
}

/// Folded view of a run log.
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    nodes: HashMap<String, NodeHistory>,
    files: HashMap<PathBuf, FileState>,
    last_dag_state: Option<DagState>,
}

impl RunHistory {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.files.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&NodeHistory> {
        self.nodes.get(name)
    }

    pub fn file_state(&self, path: &Path) -> Option<FileState> {
        self.files.get(path).copied()
    }

    pub fn last_dag_state(&self) -> Option<DagState> {
        self.last_dag_state
    }

    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Dag { state, .. } => self.last_dag_state = Some(state),
            LogRecord::Node {
                node,
                state,
                fingerprint,
                ..
            } => {
                self.nodes.insert(node, NodeHistory { state, fingerprint });
            }
            LogRecord::File { path, state, .. } => {
                self.files.insert(path, state);
            }
        }
    }
}

/// Handle on a run log file.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and fold the log. A missing log is an empty history.
    pub fn load(&self) -> Result<RunHistory> {
        let mut history = RunHistory::default();
        if !self.fs.exists(&self.path) {
            debug!(path = %self.path.display(), "no run log; starting fresh");
            return Ok(history);
        }

        let contents = self
            .fs
            .read_to_string(&self.path)
            .map_err(|e| BatchdagError::RunLog(format!("{e:#}")))?;

        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) => history.apply(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable run log line"
                ),
            }
        }

        debug!(
            path = %self.path.display(),
            nodes = history.nodes.len(),
            files = history.files.len(),
            "run log loaded"
        );
        Ok(history)
    }

    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| BatchdagError::RunLog(format!("encoding record: {e}")))?;
        line.push(b'\n');
        self.fs
            .append(&self.path, &line)
            .map_err(|e| BatchdagError::RunLog(format!("{e:#}")))
    }

    pub fn remove(&self) -> Result<()> {
        self.fs
            .remove_file(&self.path)
            .map_err(|e| BatchdagError::RunLog(format!("{e:#}")))
    }
}
