// src/dag/file.rs

//! Files and the file lifecycle:
//! `CREATE -> EXPECT -> EXIST -> COMPLETE -> CLEAN -> DELETED`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dag::NodeId;
use crate::errors::{BatchdagError, Result};

/// Index of a file in the [`Dag`](crate::dag::Dag) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Create,
    Expect,
    Exist,
    Complete,
    Clean,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// Producer was submitted.
    Expect,
    /// Present on storage (producer finished, or workflow input found).
    Exist,
    /// Producer attempt failed; the file is no longer expected.
    Reset,
    /// No remaining consumer needs the file.
    Complete,
    /// Hooks approved removal.
    Clean,
    Delete,
    /// Run log shows the file was already deleted by an earlier run.
    Restore,
}

impl FileState {
    pub fn on(self, event: FileEvent) -> Option<FileState> {
        use FileEvent as E;
        use FileState as S;

        match (self, event) {
            (S::Create, E::Expect) => Some(S::Expect),
            (S::Create, E::Exist) => Some(S::Exist),
            (S::Create, E::Restore) => Some(S::Deleted),
            (S::Expect, E::Exist) => Some(S::Exist),
            (S::Expect, E::Reset) => Some(S::Create),
            (S::Exist, E::Complete) => Some(S::Complete),
            (S::Complete, E::Clean) => Some(S::Clean),
            (S::Clean, E::Delete) => Some(S::Deleted),
            _ => None,
        }
    }

    /// Whether a consumer may rely on this file being present.
    pub fn is_available(self) -> bool {
        matches!(self, FileState::Exist | FileState::Complete)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Create => "CREATE",
            FileState::Expect => "EXPECT",
            FileState::Exist => "EXIST",
            FileState::Complete => "COMPLETE",
            FileState::Clean => "CLEAN",
            FileState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// A file shared by the nodes that produce and consume it.
///
/// `producer` and `consumers` are arena indices, not ownership.
#[derive(Debug, Clone)]
pub struct DagFile {
    pub id: FileId,
    pub path: PathBuf,
    pub producer: Option<NodeId>,
    pub consumers: Vec<NodeId>,
    pub state: FileState,
    /// Consumers that have not reached a terminal state yet.
    pub needed_by: usize,
    /// Set when a hook or the filesystem refused to collect the file.
    pub retained: bool,
}

impl DagFile {
    pub(crate) fn new(id: FileId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            producer: None,
            consumers: Vec::new(),
            state: FileState::Create,
            needed_by: 0,
            retained: false,
        }
    }

    /// Workflow input: nothing in the DAG produces it.
    pub fn is_source(&self) -> bool {
        self.producer.is_none()
    }

    /// Produced and consumed inside the workflow; only these are collected.
    pub fn is_intermediate(&self) -> bool {
        self.producer.is_some() && !self.consumers.is_empty()
    }

    pub fn apply(&mut self, event: FileEvent) -> Result<FileState> {
        let next = self
            .state
            .on(event)
            .ok_or_else(|| BatchdagError::InvalidTransition {
                subject: format!("file '{}'", self.path.display()),
                from: self.state.to_string(),
                event: format!("{event:?}"),
            })?;
        self.state = next;
        Ok(next)
    }
}
