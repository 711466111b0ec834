// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::GcMode;

/// Command-line arguments for `batchdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "batchdag",
    version,
    about = "Run a DAG of batch tasks connected by the files they produce and consume.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `Batchdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Batchdag.toml")]
    pub workflow: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BATCHDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG and its shape, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Remove every node output and the run log, then exit.
    #[arg(long, conflicts_with = "dry_run")]
    pub clean: bool,

    /// Maximum number of nodes running at once (overrides `[config]`).
    #[arg(long, value_name = "N")]
    pub max_running: Option<usize>,

    /// Default retry limit for nodes without their own (overrides `[config]`).
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Garbage collection mode: `ref_count` or `none`.
    #[arg(long, value_name = "MODE")]
    pub gc: Option<GcMode>,

    /// Run log location (overrides `[config]`).
    #[arg(long, value_name = "PATH")]
    pub run_log: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse() {
        let args = CliArgs::try_parse_from([
            "batchdag",
            "--workflow",
            "wf.toml",
            "--max-running",
            "2",
            "--gc",
            "none",
        ])
        .unwrap();
        assert_eq!(args.workflow, "wf.toml");
        assert_eq!(args.max_running, Some(2));
        assert_eq!(args.gc, Some(GcMode::None));
        assert!(!args.clean);
    }

    #[test]
    fn clean_and_dry_run_conflict() {
        assert!(CliArgs::try_parse_from(["batchdag", "--clean", "--dry-run"]).is_err());
    }
}
