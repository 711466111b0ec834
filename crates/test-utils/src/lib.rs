pub mod builders;
pub mod fake_executor;
pub mod recording_hook;

use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use batchdag::config::ConfigFile;
use batchdag::dag::Dag;
use batchdag::engine::{CoreRuntime, RunOptions};
use batchdag::fs::mock::MockFileSystem;
use batchdag::hooks::{Hook, HookDispatcher};
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ConfigFileBuilder, NodeConfigBuilder, chain_config};
pub use fake_executor::{ExecutionLog, FakeExecutor};
pub use recording_hook::{HookLog, RecordingHook};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Run options derived from `cfg`, with a fast poll interval and no run log.
pub fn test_options(cfg: &ConfigFile) -> RunOptions {
    let mut options = RunOptions::from_config(cfg, Path::new("Batchdag.toml"));
    options.poll_interval = Duration::from_millis(2);
    options.run_log = None;
    options
}

/// A core runtime over `cfg`, backed by `fs`, with `hooks` registered in
/// order.
pub fn core_with(
    cfg: &ConfigFile,
    fs: &MockFileSystem,
    hooks: Vec<Box<dyn Hook>>,
    options: RunOptions,
) -> CoreRuntime {
    let dag = Dag::from_config(cfg).expect("dag from config");
    let mut dispatcher = HookDispatcher::new();
    for hook in hooks {
        dispatcher.register(hook).expect("register hook");
    }
    CoreRuntime::new(dag, dispatcher, Arc::new(fs.clone()), options).expect("core runtime")
}
