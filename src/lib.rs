// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod hooks;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{Dag, DagFile, FileId};
use crate::engine::{AbortHandle, CoreRuntime, RunOptions, Runtime};
use crate::exec::LocalExecutor;
use crate::fs::{FileSystem, RealFileSystem};
use crate::hooks::{HookDispatcher, builtin_hooks};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow loading and CLI overrides
/// - builtin hooks
/// - core runtime + local executor
/// - Ctrl-C handling
///
/// Returns whether every node completed.
pub async fn run(args: CliArgs) -> Result<bool> {
    let workflow_path = PathBuf::from(&args.workflow);
    let mut cfg = load_and_validate(&workflow_path)?;
    apply_overrides(&mut cfg, &args);

    let dag = Dag::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &dag);
        return Ok(true);
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let mut hooks = HookDispatcher::new();
    for hook in builtin_hooks(&cfg.hooks, Arc::clone(&fs)) {
        hooks.register(hook)?;
    }

    let options = RunOptions::from_config(&cfg, &workflow_path);
    let mut core = CoreRuntime::new(dag, hooks, fs, options)?;

    if args.clean {
        let removed = core.clean()?;
        println!("batchdag clean: removed {} file(s)", removed.len());
        return Ok(true);
    }

    // Ctrl-C → abort.
    let abort = AbortHandle::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl-C received; aborting workflow");
            abort.abort();
        });
    }

    let runtime = Runtime::new(core, LocalExecutor::new()).with_abort_handle(abort);
    let report = runtime.run().await?;

    print!("{report}");
    Ok(report.success())
}

/// CLI flags win over the workflow's `[config]` / `[gc]` sections.
fn apply_overrides(cfg: &mut ConfigFile, args: &CliArgs) {
    if let Some(n) = args.max_running {
        cfg.config.max_running = Some(n);
    }
    if let Some(n) = args.retries {
        cfg.config.retry_limit = n;
    }
    if let Some(mode) = args.gc {
        cfg.gc.mode = mode;
    }
    if let Some(path) = &args.run_log {
        cfg.config.run_log = Some(path.clone());
    }
}

/// Dry-run output: nodes, files and the shape of the DAG.
fn print_dry_run(cfg: &ConfigFile, dag: &Dag) {
    println!("batchdag dry-run");
    println!("  config.max_running = {}", cfg.config.effective_max_running());
    println!("  config.retry_limit = {}", cfg.config.retry_limit);
    println!("  config.keep_going = {}", cfg.config.keep_going);
    println!("  config.max_vetoed_cycles = {}", cfg.config.max_vetoed_cycles);
    println!("  gc.mode = {:?}", cfg.gc.mode);
    println!();

    println!("nodes ({}):", dag.nodes().len());
    for node in dag.nodes() {
        println!("  - {}", node.name);
        println!("      command: {}", node.command);
        let paths = |ids: &[FileId]| -> Vec<String> {
            ids.iter()
                .map(|f| dag.file(*f).path.display().to_string())
                .collect()
        };
        if !node.inputs.is_empty() {
            println!("      inputs: {:?}", paths(&node.inputs));
        }
        if !node.outputs.is_empty() {
            println!("      outputs: {:?}", paths(&node.outputs));
        }
        if node.retry_limit > 0 {
            println!("      retries: {}", node.retry_limit);
        }
    }
    println!();

    println!("analysis:");
    println!("  tasks: {}", dag.nodes().len());
    println!("  depth: {}", dag.depth());
    println!("  max width: {}", dag.max_width());
    let list = |files: Vec<&DagFile>| -> Vec<String> {
        files.iter().map(|f| f.path.display().to_string()).collect()
    };
    println!("  input files: {:?}", list(dag.input_files()));
    println!("  output files: {:?}", list(dag.output_files()));

    debug!("dry-run complete (no execution)");
}
