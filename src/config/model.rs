// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{GcMode, Resources};

/// Top-level workflow description as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_running = 4
/// retry_limit = 1
///
/// [gc]
/// mode = "ref_count"
/// keep = ["results/**"]
///
/// [node.sort]
/// command = "sort input.txt > sorted.txt"
/// inputs = ["input.txt"]
/// outputs = ["sorted.txt"]
/// ```
///
/// All sections except `[node.<id>]` are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub gc: GcSection,

    #[serde(default)]
    pub hooks: HooksSection,

    /// All nodes from `[node.<id>]`, keyed by node id.
    ///
    /// Node creation order is the key order, which keeps submission order
    /// stable between runs of the same file.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// Validated workflow description.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`, so holders
/// can rely on single-writer files, known references and acyclicity.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub gc: GcSection,
    pub hooks: HooksSection,
    pub node: BTreeMap<String, NodeConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            gc: raw.gc,
            hooks: raw.hooks,
            node: raw.node,
        }
    }
}

/// `[config]` section: scheduler behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of simultaneously running nodes.
    ///
    /// `None` means "one per available CPU".
    #[serde(default)]
    pub max_running: Option<usize>,

    /// Default retry limit for nodes that do not set `retries`.
    #[serde(default)]
    pub retry_limit: u32,

    /// Upper bound on a single executor wait, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Keep running independent branches after a permanent failure.
    #[serde(default = "default_keep_going")]
    pub keep_going: bool,

    /// Consecutive idle cycles in which every ready node was skipped by
    /// `node_check` before the run gives up. `0` waits forever.
    #[serde(default = "default_max_vetoed_cycles")]
    pub max_vetoed_cycles: u32,

    /// Location of the run log. Defaults to `<workflow file>.batchlog`.
    #[serde(default)]
    pub run_log: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_keep_going() -> bool {
    true
}

fn default_max_vetoed_cycles() -> u32 {
    120
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_running: None,
            retry_limit: 0,
            poll_interval_ms: default_poll_interval_ms(),
            keep_going: default_keep_going(),
            max_vetoed_cycles: default_max_vetoed_cycles(),
            run_log: None,
        }
    }
}

impl ConfigSection {
    pub fn effective_max_running(&self) -> usize {
        self.max_running.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// `[gc]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GcSection {
    #[serde(default)]
    pub mode: GcMode,

    /// Glob patterns for files that must never be collected.
    #[serde(default)]
    pub keep: Vec<String>,
}

/// `[hooks.*]` sections for the builtin hooks. Absent sections disable the hook.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HooksSection {
    #[serde(default)]
    pub wrapper: Option<WrapperHookConfig>,

    #[serde(default)]
    pub archive: Option<ArchiveHookConfig>,

    #[serde(default)]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WrapperHookConfig {
    /// Command template; `{}` is replaced with the node's command.
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveHookConfig {
    pub dir: String,
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Shell command; opaque to the engine.
    pub command: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    /// Per-node retry limit; falls back to `[config].retry_limit`.
    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub resources: Resources,
}

impl NodeConfig {
    pub fn effective_retries(&self, default_retry_limit: u32) -> u32 {
        self.retries.unwrap_or(default_retry_limit)
    }
}
