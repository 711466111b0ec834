#![allow(dead_code)]

use std::collections::BTreeMap;

use batchdag::config::{
    ConfigFile, ConfigSection, GcSection, HooksSection, NodeConfig, RawConfigFile,
};
use batchdag::errors::Result;
use batchdag::types::{GcMode, Resources};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                gc: GcSection::default(),
                hooks: HooksSection::default(),
                node: BTreeMap::new(),
            },
        }
    }

    pub fn with_node(mut self, name: &str, node: NodeConfig) -> Self {
        self.config.node.insert(name.to_string(), node);
        self
    }

    pub fn max_running(mut self, n: usize) -> Self {
        self.config.config.max_running = Some(n);
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.config.config.retry_limit = n;
        self
    }

    pub fn keep_going(mut self, val: bool) -> Self {
        self.config.config.keep_going = val;
        self
    }

    pub fn gc_mode(mut self, mode: GcMode) -> Self {
        self.config.gc.mode = mode;
        self
    }

    pub fn gc_keep(mut self, pattern: &str) -> Self {
        self.config.gc.keep.push(pattern.to_string());
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            node: NodeConfig {
                command: command.to_string(),
                inputs: vec![],
                outputs: vec![],
                retries: None,
                resources: Resources::default(),
            },
        }
    }

    pub fn input(mut self, path: &str) -> Self {
        self.node.inputs.push(path.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.node.outputs.push(path.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.node.retries = Some(n);
        self
    }

    pub fn cores(mut self, n: u32) -> Self {
        self.node.resources.cores = Some(n);
        self
    }

    pub fn memory_mb(mut self, n: u64) -> Self {
        self.node.resources.memory_mb = Some(n);
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}

/// `A -> f1 -> B -> f2 -> C`, with `in.txt` as the workflow input and
/// `out.txt` as the final output.
pub fn chain_config() -> ConfigFileBuilder {
    ConfigFileBuilder::new()
        .with_node(
            "A",
            NodeConfigBuilder::new("make f1")
                .input("in.txt")
                .output("f1")
                .build(),
        )
        .with_node(
            "B",
            NodeConfigBuilder::new("make f2")
                .input("f1")
                .output("f2")
                .build(),
        )
        .with_node(
            "C",
            NodeConfigBuilder::new("make out")
                .input("f2")
                .output("out.txt")
                .build(),
        )
}
