// src/logging.rs

//! Logging setup for `batchdag` using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. `--log-level` CLI flag (applies to everything)
//! 2. `BATCHDAG_LOG`, as `EnvFilter` directives (e.g. `info,batchdag::engine=debug`)
//! 3. `info`
//!
//! Logs go to stderr; stdout carries only the dry-run listing and the final
//! run report.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "BATCHDAG_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }
    env.and_then(|raw| {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        EnvFilter::try_new(raw)
            .map_err(|e| eprintln!("ignoring invalid {LOG_ENV}={raw:?}: {e}"))
            .ok()
    })
    .unwrap_or_else(|| EnvFilter::new("info"))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
