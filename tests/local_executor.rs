// tests/local_executor.rs
#![cfg(unix)]

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use batchdag::cli::CliArgs;
use batchdag::config::ConfigFile;
use batchdag::dag::{Dag, FileState, NodeState};
use batchdag::engine::{CoreRuntime, DagVerdict, RunOptions, Runtime};
use batchdag::exec::LocalExecutor;
use batchdag::fs::RealFileSystem;
use batchdag::hooks::HookDispatcher;
use batchdag_test_utils::{ConfigFileBuilder, NodeConfigBuilder, init_tracing, with_timeout};
use clap::Parser;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn p(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).display().to_string()
}

/// `upper` and `count` over a seeded `words.txt`, all paths absolute.
fn word_pipeline(dir: &TempDir) -> ConfigFile {
    let (words, upper, count) = (p(dir, "words.txt"), p(dir, "upper.txt"), p(dir, "count.txt"));
    ConfigFileBuilder::new()
        .max_running(2)
        .with_node(
            "upper",
            NodeConfigBuilder::new(&format!("tr a-z A-Z < {words} > {upper}"))
                .input(&words)
                .output(&upper)
                .build(),
        )
        .with_node(
            "count",
            NodeConfigBuilder::new(&format!("wc -l < {upper} > {count}"))
                .input(&upper)
                .output(&count)
                .build(),
        )
        .build()
}

fn core_for(cfg: &ConfigFile) -> Result<CoreRuntime, Box<dyn Error>> {
    core_polling_every(cfg, Duration::from_millis(10))
}

fn core_polling_every(cfg: &ConfigFile, poll: Duration) -> Result<CoreRuntime, Box<dyn Error>> {
    let mut options = RunOptions::from_config(cfg, Path::new("Batchdag.toml"));
    options.poll_interval = poll;
    options.run_log = None;
    let dag = Dag::from_config(cfg)?;
    let core = CoreRuntime::new(dag, HookDispatcher::new(), Arc::new(RealFileSystem), options)?;
    Ok(core)
}

#[tokio::test]
async fn shell_commands_produce_and_collect_files() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("words.txt"), "alpha\nbeta\ngamma\n")?;

    let cfg = word_pipeline(&dir);
    let report = with_timeout(Runtime::new(core_for(&cfg)?, LocalExecutor::new()).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    let count = std::fs::read_to_string(dir.path().join("count.txt"))?;
    assert_eq!(count.trim(), "3");

    // The intermediate is gone, the workflow input is not.
    assert!(!dir.path().join("upper.txt").exists());
    assert!(dir.path().join("words.txt").exists());
    assert_eq!(
        report.file(&p(&dir, "upper.txt")).unwrap().state,
        FileState::Deleted
    );
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_is_a_failure_with_its_status() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let out = p(&dir, "never.txt");
    let cfg = ConfigFileBuilder::new()
        .with_node(
            "broken",
            NodeConfigBuilder::new("exit 3").output(&out).build(),
        )
        .build();

    let report = with_timeout(Runtime::new(core_for(&cfg)?, LocalExecutor::new()).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Failed);
    let broken = report.node("broken").unwrap();
    assert_eq!(broken.state, NodeState::Failed);
    assert_eq!(broken.exit_code, Some(3));
    Ok(())
}

#[tokio::test]
async fn a_command_that_forgets_its_output_fails() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let out = p(&dir, "missing.txt");
    let cfg = ConfigFileBuilder::new()
        .with_node("lazy", NodeConfigBuilder::new("true").output(&out).build())
        .build();

    let report = with_timeout(Runtime::new(core_for(&cfg)?, LocalExecutor::new()).run()).await?;

    let lazy = report.node("lazy").unwrap();
    assert_eq!(lazy.state, NodeState::Failed);
    assert!(lazy.failure.as_deref().unwrap().starts_with("missing output(s)"));
    Ok(())
}

#[tokio::test]
async fn aborting_kills_long_running_commands() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let out = p(&dir, "slow.txt");
    let cfg = ConfigFileBuilder::new()
        .with_node(
            "slow",
            NodeConfigBuilder::new(&format!("sleep 30 && touch {out}"))
                .output(&out)
                .build(),
        )
        .build();

    let runtime = Runtime::new(core_for(&cfg)?, LocalExecutor::new());
    let abort = runtime.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        abort.abort();
    });

    let report = with_timeout(runtime.run()).await?;
    assert_eq!(report.verdict, DagVerdict::Aborted);
    assert_eq!(report.node("slow").unwrap().state, NodeState::Aborted);
    assert!(!Path::new(&out).exists());
    Ok(())
}

#[tokio::test]
async fn abort_interrupts_a_long_executor_wait() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let out = p(&dir, "slow.txt");
    let cfg = ConfigFileBuilder::new()
        .with_node(
            "slow",
            NodeConfigBuilder::new(&format!("sleep 30 && touch {out}"))
                .output(&out)
                .build(),
        )
        .build();

    // A single wait would outlast the test timeout.
    let core = core_polling_every(&cfg, Duration::from_secs(60))?;
    let runtime = Runtime::new(core, LocalExecutor::new());
    let abort = runtime.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.abort();
    });

    let report = with_timeout(runtime.run()).await?;
    assert_eq!(report.verdict, DagVerdict::Aborted);
    assert_eq!(report.node("slow").unwrap().state, NodeState::Aborted);
    Ok(())
}

fn write_workflow(dir: &TempDir) -> Result<String, Box<dyn Error>> {
    std::fs::write(dir.path().join("words.txt"), "one\ntwo\n")?;
    let toml = format!(
        r#"
        [config]
        max_running = 2
        poll_interval_ms = 10

        [node.upper]
        command = "tr a-z A-Z < {words} > {upper}"
        inputs = ["{words}"]
        outputs = ["{upper}"]

        [node.count]
        command = "wc -l < {upper} > {count}"
        inputs = ["{upper}"]
        outputs = ["{count}"]
        "#,
        words = p(dir, "words.txt"),
        upper = p(dir, "upper.txt"),
        count = p(dir, "count.txt"),
    );
    let workflow = p(dir, "Batchdag.toml");
    std::fs::write(&workflow, toml)?;
    Ok(workflow)
}

#[tokio::test]
async fn cli_entry_point_runs_restarts_and_cleans() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let workflow = write_workflow(&dir)?;
    let run_log = dir.path().join("Batchdag.toml.batchlog");

    let args = CliArgs::try_parse_from(["batchdag", "--workflow", &workflow])?;
    assert!(with_timeout(batchdag::run(args.clone())).await?);
    assert!(dir.path().join("count.txt").exists());
    assert!(run_log.exists());

    // Nothing left to do the second time around.
    let modified = std::fs::metadata(dir.path().join("count.txt"))?.modified()?;
    assert!(with_timeout(batchdag::run(args)).await?);
    assert_eq!(
        std::fs::metadata(dir.path().join("count.txt"))?.modified()?,
        modified
    );

    let clean = CliArgs::try_parse_from(["batchdag", "--workflow", &workflow, "--clean"])?;
    assert!(with_timeout(batchdag::run(clean)).await?);
    assert!(!dir.path().join("count.txt").exists());
    assert!(!run_log.exists());
    assert!(dir.path().join("words.txt").exists());
    Ok(())
}

#[tokio::test]
async fn dry_run_touches_nothing() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let workflow = write_workflow(&dir)?;

    let args = CliArgs::try_parse_from(["batchdag", "--workflow", &workflow, "--dry-run"])?;
    assert!(with_timeout(batchdag::run(args)).await?);
    assert!(!dir.path().join("count.txt").exists());
    assert!(!dir.path().join("Batchdag.toml.batchlog").exists());
    Ok(())
}
