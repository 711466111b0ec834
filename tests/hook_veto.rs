// tests/hook_veto.rs

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use batchdag::dag::{FileState, NodeState};
use batchdag::engine::{DagVerdict, Runtime};
use batchdag::errors::BatchdagError;
use batchdag::fs::FileSystem;
use batchdag::fs::mock::MockFileSystem;
use batchdag::hooks::{ArchiveHook, Hook, HookEvent, ResourceCheckHook, WrapperHook};
use batchdag::types::{GcMode, Resources};
use batchdag_test_utils::{
    ConfigFileBuilder, FakeExecutor, HookLog, NodeConfigBuilder, RecordingHook, chain_config,
    core_with, init_tracing, test_options, with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

fn seeded_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file("in.txt", "input");
    fs
}

/// Three independent nodes `M`, `N`, `O`.
fn siblings() -> ConfigFileBuilder {
    ["M", "N", "O"].iter().fold(ConfigFileBuilder::new(), |b, name| {
        b.with_node(
            name,
            NodeConfigBuilder::new(&format!("make {name}"))
                .output(&format!("{name}.out"))
                .build(),
        )
    })
}

#[tokio::test]
async fn pre_run_hooks_fire_in_order() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("rec");
    let log = hook.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    let order = [
        "create",
        "dag_init",
        "node_create:A",
        "node_create:C",
        "file_create:in.txt",
        "dag_check",
        "file_exist:in.txt",
        "dag_start",
        "node_check:A",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|e| log.position(e).unwrap_or_else(|| panic!("missing {e}")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    Ok(())
}

#[tokio::test]
async fn hooks_are_called_in_registration_order() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let shared = HookLog::default();
    let first = RecordingHook::new("first").with_log(shared.clone());
    let second = RecordingHook::new("second").with_log(shared.clone());
    let core = core_with(
        &cfg,
        &fs,
        vec![first.boxed(), second.boxed()],
        test_options(&cfg),
    );
    with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    // Each event appears twice in a row: once per hook.
    let entries = shared.entries();
    assert_eq!(&entries[..2], &["create", "create"]);
    assert_eq!(shared.count("dag_end"), 2);
    Ok(())
}

#[tokio::test]
async fn first_veto_stops_later_hooks() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let shared = HookLog::default();
    let first = RecordingHook::new("gate")
        .with_log(shared.clone())
        .veto("dag_check", None);
    let second = RecordingHook::new("after").with_log(shared.clone());
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(
        &cfg,
        &fs,
        vec![first.boxed(), second.boxed()],
        test_options(&cfg),
    );

    let err = with_timeout(Runtime::new(core, executor).run())
        .await
        .unwrap_err();
    match err {
        BatchdagError::HookVeto { hook, event, .. } => {
            assert_eq!(hook, "gate");
            assert_eq!(event, HookEvent::DagCheck);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(shared.count("dag_check"), 1);
    assert!(!shared.contains("dag_start"));
    assert!(exec.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn node_check_veto_skips_only_that_node() -> TestResult {
    init_tracing();

    let cfg = siblings().max_running(4).build();
    let fs = MockFileSystem::new();
    let hook = RecordingHook::new("gate").veto("node_check", Some("N"));
    let log = hook.log();
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let mut options = test_options(&cfg);
    options.max_vetoed_cycles = 3;
    let core = core_with(&cfg, &fs, vec![hook.boxed()], options);
    let report = with_timeout(Runtime::new(core, executor).run()).await?;

    assert_eq!(exec.submitted(), vec!["M", "O"]);
    // O went out in the same cycle that skipped N.
    assert!(log.position("node_submit:O").unwrap() < log.position("node_end:M").unwrap());

    // N is asked again every cycle: once alongside M and O, then three idle
    // cycles before the run gives up on it.
    assert_eq!(log.count("node_check:N"), 4);
    assert_eq!(report.node("N").unwrap().state, NodeState::Waiting);
    assert_eq!(report.node("M").unwrap().state, NodeState::Complete);
    assert_eq!(report.verdict, DagVerdict::Failed);
    Ok(())
}

#[tokio::test]
async fn node_check_veto_lasts_one_cycle() -> TestResult {
    init_tracing();

    // Nothing else is running when A is skipped; the loop must still come
    // back for it.
    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("gate").veto_times("node_check", Some("A"), 1);
    let log = hook.log();
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, executor).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    assert_eq!(exec.submitted(), vec!["A", "B", "C"]);
    assert_eq!(log.count("node_check:A"), 2);
    assert_eq!(report.node("A").unwrap().state, NodeState::Complete);
    Ok(())
}

#[tokio::test]
async fn node_submit_veto_counts_as_a_failed_submission() -> TestResult {
    init_tracing();

    let cfg = chain_config().retry_limit(0).build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("gate").veto("node_submit", Some("A"));
    let log = hook.log();
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, executor).run()).await?;

    assert!(exec.submitted().is_empty());
    let a = report.node("A").unwrap();
    assert_eq!(a.state, NodeState::Failed);
    assert!(a.failure.as_deref().unwrap().contains("gate vetoes node_submit"));
    assert_eq!(log.count("node_fail:A"), 1);
    assert_eq!(report.verdict, DagVerdict::Failed);
    Ok(())
}

#[tokio::test]
async fn node_end_veto_fails_a_successful_execution() -> TestResult {
    init_tracing();

    let cfg = chain_config().retry_limit(0).build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("gate").veto("node_end", Some("B"));
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, executor).run()).await?;

    assert_eq!(exec.submitted(), vec!["A", "B"]);
    assert_eq!(report.node("B").unwrap().state, NodeState::Failed);
    assert_eq!(report.node("C").unwrap().state, NodeState::Waiting);
    Ok(())
}

#[tokio::test]
async fn dag_end_veto_turns_the_verdict_into_failure() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("gate").veto("dag_end", None);
    let log = hook.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.count(NodeState::Complete), 3);
    assert_eq!(report.verdict, DagVerdict::Failed);
    assert!(log.position("dag_end").unwrap() < log.position("dag_fail").unwrap());
    Ok(())
}

#[tokio::test]
async fn file_clean_veto_retains_the_file() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hook = RecordingHook::new("keeper").veto("file_clean", Some("f1"));
    let log = hook.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    assert_eq!(report.file("f1").unwrap().state, FileState::Complete);
    assert_eq!(report.file("f2").unwrap().state, FileState::Deleted);
    assert!(fs.exists(Path::new("f1")));
    // Offered once, then left alone.
    assert_eq!(log.count("file_clean:f1"), 1);
    Ok(())
}

#[tokio::test]
async fn failed_removal_keeps_the_file_without_failing_the_run() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    fs.fail_removal("f1");
    let hook = RecordingHook::new("rec");
    let log = hook.log();
    let core = core_with(&cfg, &fs, vec![hook.boxed()], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    assert_eq!(report.file("f1").unwrap().state, FileState::Clean);
    assert!(fs.exists(Path::new("f1")));
    assert!(!log.contains("file_deleted:f1"));
    Ok(())
}

#[tokio::test]
async fn gc_keep_patterns_protect_matching_files() -> TestResult {
    init_tracing();

    let cfg = chain_config().gc_keep("f2").build();
    let fs = seeded_fs();
    let core = core_with(&cfg, &fs, vec![], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.file("f1").unwrap().state, FileState::Deleted);
    assert_eq!(report.file("f2").unwrap().state, FileState::Complete);
    assert!(fs.exists(Path::new("f2")));
    Ok(())
}

#[tokio::test]
async fn gc_disabled_keeps_every_file() -> TestResult {
    init_tracing();

    let cfg = chain_config().gc_mode(GcMode::None).build();
    let fs = seeded_fs();
    let core = core_with(&cfg, &fs, vec![], test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    assert_eq!(report.file("f1").unwrap().state, FileState::Complete);
    assert!(fs.exists(Path::new("f1")));
    assert!(fs.exists(Path::new("f2")));
    Ok(())
}

#[tokio::test]
async fn wrapper_hook_rewrites_submitted_commands() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hooks: Vec<Box<dyn Hook>> = vec![Box::new(WrapperHook::new("time -p {}"))];
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(&cfg, &fs, hooks, test_options(&cfg));
    with_timeout(Runtime::new(core, executor).run()).await?;

    let commands: Vec<String> = exec.tasks().into_iter().map(|t| t.command).collect();
    assert_eq!(
        commands,
        vec!["time -p make f1", "time -p make f2", "time -p make out"]
    );
    Ok(())
}

#[tokio::test]
async fn archive_hook_copies_files_before_collection() -> TestResult {
    init_tracing();

    let cfg = chain_config().build();
    let fs = seeded_fs();
    let hooks: Vec<Box<dyn Hook>> = vec![Box::new(ArchiveHook::new(
        "archive",
        Arc::new(fs.clone()),
    ))];
    let core = core_with(&cfg, &fs, hooks, test_options(&cfg));
    let report = with_timeout(Runtime::new(core, FakeExecutor::new(fs.clone())).run()).await?;

    assert_eq!(report.verdict, DagVerdict::Complete);
    assert!(!fs.exists(Path::new("f1")));
    assert_eq!(fs.read_to_string(Path::new("archive/f1"))?, "written by A");
    assert_eq!(fs.read_to_string(Path::new("archive/f2"))?, "written by B");
    // Final outputs are not collected, so not archived either.
    assert!(!fs.exists(Path::new("archive/out.txt")));
    Ok(())
}

#[tokio::test]
async fn resource_check_rejects_oversized_nodes() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_node(
            "big",
            NodeConfigBuilder::new("make out").output("out").cores(8).build(),
        )
        .build();
    let fs = MockFileSystem::new();
    let limits = Resources {
        cores: Some(4),
        ..Resources::default()
    };
    let hooks: Vec<Box<dyn Hook>> = vec![Box::new(ResourceCheckHook::new(limits))];
    let executor = FakeExecutor::new(fs.clone());
    let exec = executor.log();
    let core = core_with(&cfg, &fs, hooks, test_options(&cfg));

    let err = with_timeout(Runtime::new(core, executor).run())
        .await
        .unwrap_err();
    match err {
        BatchdagError::HookVeto { hook, event, reason } => {
            assert_eq!(hook, "resources");
            assert_eq!(event, HookEvent::DagCheck);
            assert!(reason.contains("requests 8 cores"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(exec.submitted().is_empty());
    Ok(())
}
