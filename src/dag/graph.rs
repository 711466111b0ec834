// src/dag/graph.rs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::model::{ConfigFile, NodeConfig};
use crate::dag::file::{DagFile, FileId};
use crate::dag::node::{DagNode, NodeId};
use crate::errors::{BatchdagError, Result};

/// Whole-run state of the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DagState {
    Uninit,
    Checked,
    Running,
    End,
    Failed,
    Aborted,
}

impl fmt::Display for DagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DagState::Uninit => "UNINIT",
            DagState::Checked => "CHECKED",
            DagState::Running => "RUNNING",
            DagState::End => "END",
            DagState::Failed => "FAILED",
            DagState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Arena of nodes and files.
///
/// Nodes and files refer to each other only through [`NodeId`] / [`FileId`]
/// indices into this table. The shape is fixed once built; only node and
/// file states change during a run.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: Vec<DagNode>,
    files: Vec<DagFile>,
    node_index: HashMap<String, NodeId>,
    file_index: HashMap<PathBuf, FileId>,
    state: DagState,
}

impl Dag {
    /// Build a DAG from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut builder = DagBuilder::new(cfg.config.retry_limit);
        for (name, node) in cfg.node.iter() {
            builder.add_node(name, node)?;
        }
        builder.build()
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn files(&self) -> &[DagFile] {
        &self.files
    }

    pub fn node(&self, id: NodeId) -> &DagNode {
        &self.nodes[id.0]
    }

    pub fn file(&self, id: FileId) -> &DagFile {
        &self.files[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut DagNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn file_mut(&mut self, id: FileId) -> &mut DagFile {
        &mut self.files[id.0]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&DagNode> {
        self.node_index.get(name).map(|id| self.node(*id))
    }

    pub fn file_by_path(&self, path: impl AsRef<Path>) -> Option<&DagFile> {
        self.file_index.get(path.as_ref()).map(|id| self.file(*id))
    }

    pub fn state(&self) -> DagState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DagState) {
        self.state = state;
    }

    /// Nodes producing this node's inputs, without duplicates.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self
            .node(id)
            .inputs
            .iter()
            .filter_map(|f| self.file(*f).producer)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Nodes consuming this node's outputs, without duplicates.
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self
            .node(id)
            .outputs
            .iter()
            .flat_map(|f| self.file(*f).consumers.iter().copied())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Files no node produces.
    pub fn input_files(&self) -> Vec<&DagFile> {
        self.files.iter().filter(|f| f.is_source()).collect()
    }

    /// Produced files nobody consumes: the workflow's final results.
    pub fn output_files(&self) -> Vec<&DagFile> {
        self.files
            .iter()
            .filter(|f| f.producer.is_some() && f.consumers.is_empty())
            .collect()
    }

    /// Level of each node: 1 for nodes without producers upstream, otherwise
    /// one more than the deepest dependency. Indexed by `NodeId`.
    pub fn levels(&self) -> Result<Vec<usize>> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.dependencies_of(n.id).len())
            .collect();
        let mut levels = vec![1usize; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| pending[n.id.0] == 0)
            .map(|n| n.id)
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in self.dependents_of(id) {
                levels[dependent.0] = levels[dependent.0].max(levels[id.0] + 1);
                pending[dependent.0] -= 1;
                if pending[dependent.0] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .find(|n| pending[n.id.0] > 0)
                .map(|n| n.name.clone())
                .unwrap_or_default();
            return Err(BatchdagError::DagCycle(format!(
                "cycle detected in node DAG involving node '{stuck}'"
            )));
        }

        Ok(levels)
    }

    /// Length of the longest producer -> consumer chain.
    pub fn depth(&self) -> usize {
        self.levels()
            .map(|l| l.into_iter().max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Largest number of nodes sharing one level.
    pub fn max_width(&self) -> usize {
        let Ok(levels) = self.levels() else {
            return 0;
        };
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for level in levels {
            *counts.entry(level).or_default() += 1;
        }
        counts.into_values().max().unwrap_or(0)
    }

    /// Stable digest of what a node does: its command and file lists.
    ///
    /// A completed node is only skipped on restart when this still matches.
    pub fn fingerprint(&self, id: NodeId) -> String {
        let node = self.node(id);
        let mut hasher = Hasher::new();
        hasher.update(node.command.as_bytes());
        for (tag, files) in [(b"<", &node.inputs), (b">", &node.outputs)] {
            for file in files {
                hasher.update(tag);
                hasher.update(self.file(*file).path.to_string_lossy().as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Incremental DAG construction.
///
/// Files are interned by path on first mention. Node creation order is the
/// order of `add_node` calls.
#[derive(Debug)]
pub struct DagBuilder {
    dag: Dag,
    default_retry_limit: u32,
}

impl DagBuilder {
    pub fn new(default_retry_limit: u32) -> Self {
        Self {
            dag: Dag {
                nodes: Vec::new(),
                files: Vec::new(),
                node_index: HashMap::new(),
                file_index: HashMap::new(),
                state: DagState::Uninit,
            },
            default_retry_limit,
        }
    }

    pub fn add_node(&mut self, name: &str, cfg: &NodeConfig) -> Result<NodeId> {
        if self.dag.node_index.contains_key(name) {
            return Err(BatchdagError::ConfigError(format!(
                "node '{name}' defined more than once"
            )));
        }

        let id = NodeId(self.dag.nodes.len());
        let mut node = DagNode::new(
            id,
            name.to_string(),
            cfg.command.clone(),
            cfg.resources,
            cfg.effective_retries(self.default_retry_limit),
        );

        for input in &cfg.inputs {
            let file = self.intern_file(input);
            if node.inputs.contains(&file) {
                return Err(BatchdagError::ConfigError(format!(
                    "node '{name}' lists input '{input}' more than once"
                )));
            }
            node.inputs.push(file);
        }

        for output in &cfg.outputs {
            let file = self.intern_file(output);
            if node.inputs.contains(&file) || node.outputs.contains(&file) {
                return Err(BatchdagError::ConfigError(format!(
                    "node '{name}' lists '{output}' as output more than once or also as input"
                )));
            }
            if let Some(producer) = self.dag.file(file).producer {
                return Err(BatchdagError::ConfigError(format!(
                    "file '{output}' is produced by both '{}' and '{name}'",
                    self.dag.node(producer).name
                )));
            }
            node.outputs.push(file);
        }

        for file in &node.inputs {
            let f = self.dag.file_mut(*file);
            f.consumers.push(id);
            f.needed_by += 1;
        }
        for file in &node.outputs {
            self.dag.file_mut(*file).producer = Some(id);
        }

        self.dag.node_index.insert(name.to_string(), id);
        self.dag.nodes.push(node);
        Ok(id)
    }

    pub fn build(self) -> Result<Dag> {
        // Rejects cycles.
        self.dag.levels()?;
        Ok(self.dag)
    }

    fn intern_file(&mut self, path: &str) -> FileId {
        let path = PathBuf::from(path);
        if let Some(id) = self.dag.file_index.get(&path) {
            return *id;
        }
        let id = FileId(self.dag.files.len());
        self.dag.files.push(DagFile::new(id, path.clone()));
        self.dag.file_index.insert(path, id);
        id
    }
}
