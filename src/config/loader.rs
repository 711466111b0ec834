// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a workflow file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (producers, cycles, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

/// Parse a workflow description held in memory.
pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a workflow file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - files with more than one producer,
///   - nodes consuming their own output,
///   - DAG cycles,
///   - basic global config sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Default workflow file looked up in the current working directory.
pub fn default_workflow_path() -> PathBuf {
    PathBuf::from("Batchdag.toml")
}

/// Run log location used when neither the CLI nor `[config].run_log` sets one.
pub fn default_run_log_path(workflow_path: &Path) -> PathBuf {
    let mut name = workflow_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "workflow".into());
    name.push(".batchlog");
    workflow_path.with_file_name(name)
}
