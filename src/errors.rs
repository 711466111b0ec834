// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::hooks::HookEvent;

#[derive(Error, Debug)]
pub enum BatchdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Invalid transition for {subject}: {event} from {from}")]
    InvalidTransition {
        subject: String,
        from: String,
        event: String,
    },

    #[error("Hook '{hook}' vetoed {event}: {reason}")]
    HookVeto {
        hook: String,
        event: HookEvent,
        reason: String,
    },

    #[error("Run log error: {0}")]
    RunLog(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BatchdagError>;
