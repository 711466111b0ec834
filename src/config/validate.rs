// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use globset::Glob;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BatchdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BatchdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_global_config(cfg)?;
    validate_node_files(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(BatchdagError::ConfigError(
            "workflow must contain at least one [node.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_running == Some(0) {
        return Err(BatchdagError::ConfigError(
            "[config].max_running must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.poll_interval_ms == 0 {
        return Err(BatchdagError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    for pattern in &cfg.gc.keep {
        Glob::new(pattern).map_err(|e| {
            BatchdagError::ConfigError(format!("invalid [gc].keep pattern '{pattern}': {e}"))
        })?;
    }

    if let Some(wrapper) = &cfg.hooks.wrapper {
        if !wrapper.command.contains("{}") {
            return Err(BatchdagError::ConfigError(format!(
                "[hooks.wrapper].command must contain '{{}}' (got '{}')",
                wrapper.command
            )));
        }
    }

    Ok(())
}

fn validate_node_files(cfg: &RawConfigFile) -> Result<()> {
    let mut producers: HashMap<&str, &str> = HashMap::new();

    for (name, node) in cfg.node.iter() {
        if node.command.trim().is_empty() {
            return Err(BatchdagError::ConfigError(format!(
                "node '{name}' has an empty command"
            )));
        }

        let mut seen_inputs = HashSet::new();
        for input in &node.inputs {
            if !seen_inputs.insert(input.as_str()) {
                return Err(BatchdagError::ConfigError(format!(
                    "node '{name}' lists input '{input}' more than once"
                )));
            }
        }

        let mut seen_outputs = HashSet::new();
        for output in &node.outputs {
            if !seen_outputs.insert(output.as_str()) {
                return Err(BatchdagError::ConfigError(format!(
                    "node '{name}' lists output '{output}' more than once"
                )));
            }
            if seen_inputs.contains(output.as_str()) {
                return Err(BatchdagError::ConfigError(format!(
                    "node '{name}' cannot consume its own output '{output}'"
                )));
            }
            if let Some(other) = producers.insert(output.as_str(), name.as_str()) {
                return Err(BatchdagError::ConfigError(format!(
                    "file '{output}' is produced by both '{other}' and '{name}'"
                )));
            }
        }
    }

    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: producer -> consumer.
    let mut producers: HashMap<&str, &str> = HashMap::new();
    for (name, node) in cfg.node.iter() {
        for output in &node.outputs {
            producers.insert(output.as_str(), name.as_str());
        }
    }

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in cfg.node.keys() {
        graph.add_node(name.as_str());
    }
    for (name, node) in cfg.node.iter() {
        for input in &node.inputs {
            if let Some(producer) = producers.get(input.as_str()) {
                graph.add_edge(producer, name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(BatchdagError::DagCycle(format!(
            "cycle detected in node DAG involving node '{}'",
            cycle.node_id()
        ))),
    }
}
