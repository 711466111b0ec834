// src/config/mod.rs

//! Workflow description loading and validation for batchdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate basic invariants like single-writer files and acyclicity
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_run_log_path, default_workflow_path, load_and_validate, load_from_path, load_from_str,
};
pub use model::{
    ArchiveHookConfig, ConfigFile, ConfigSection, GcSection, HooksSection, NodeConfig,
    RawConfigFile, WrapperHookConfig,
};
pub use validate::validate_raw_config;
