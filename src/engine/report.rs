// src/engine/report.rs

use std::fmt;
use std::path::PathBuf;

use crate::dag::{Dag, FileState, NodeState};

/// Workflow-level outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagVerdict {
    /// Every node reached `COMPLETE`.
    Complete,
    Failed,
    Aborted,
}

impl fmt::Display for DagVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DagVerdict::Complete => "complete",
            DagVerdict::Failed => "failed",
            DagVerdict::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub name: String,
    pub state: NodeState,
    /// Submissions accepted by the executor.
    pub attempts: u32,
    pub retries: u32,
    pub exit_code: Option<i32>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub state: FileState,
}

/// Final status of a run: verdict plus per-node and per-file outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub verdict: DagVerdict,
    pub nodes: Vec<NodeReport>,
    pub files: Vec<FileReport>,
    /// Total submissions accepted by the executor during this run.
    pub submitted: usize,
}

impl RunReport {
    pub(crate) fn build(
        dag: &Dag,
        verdict: DagVerdict,
        attempts: &[u32],
        submitted: usize,
    ) -> Self {
        let nodes = dag
            .nodes()
            .iter()
            .map(|n| NodeReport {
                name: n.name.clone(),
                state: n.state,
                attempts: attempts.get(n.id.0).copied().unwrap_or(0),
                retries: n.retries,
                exit_code: n.exit_code,
                failure: n.failure.clone(),
            })
            .collect();

        let files = dag
            .files()
            .iter()
            .map(|f| FileReport {
                path: f.path.clone(),
                state: f.state,
            })
            .collect();

        Self {
            verdict,
            nodes,
            files,
            submitted,
        }
    }

    pub fn success(&self) -> bool {
        self.verdict == DagVerdict::Complete
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn file(&self, path: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.path.as_os_str() == path)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.state == NodeState::Failed)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "workflow {}: {} complete, {} failed, {} aborted, {} waiting ({} submissions)",
            self.verdict,
            self.count(NodeState::Complete),
            self.count(NodeState::Failed),
            self.count(NodeState::Aborted),
            self.count(NodeState::Waiting) + self.count(NodeState::Created),
            self.submitted,
        )?;

        for node in &self.nodes {
            write!(f, "  {:<9} {}", node.state, node.name)?;
            if node.attempts > 0 {
                write!(f, " (attempts: {})", node.attempts)?;
            }
            if let Some(code) = node.exit_code {
                if code != 0 {
                    write!(f, " exit {code}")?;
                }
            }
            if node.state == NodeState::Failed {
                if let Some(reason) = &node.failure {
                    write!(f, ": {reason}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
