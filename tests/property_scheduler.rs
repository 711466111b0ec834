// tests/property_scheduler.rs

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use batchdag::config::ConfigFile;
use batchdag::dag::{Dag, DagFile, DagNode, FileState, NodeState};
use batchdag::engine::{DagVerdict, Runtime};
use batchdag::exec::BatchTask;
use batchdag::fs::mock::MockFileSystem;
use batchdag::hooks::{Hook, HookResult};
use batchdag_test_utils::{
    ConfigFileBuilder, FakeExecutor, NodeConfigBuilder, core_with, test_options, with_timeout,
};
use proptest::prelude::*;

/// Generated workflow: node `i` writes `f{i}` and may read `src` or any
/// `f{j}` with `j < i`, so the graph is always acyclic.
#[derive(Debug, Clone)]
struct Workflow {
    inputs: Vec<BTreeSet<usize>>,
    reads_src: Vec<bool>,
    retries: Vec<u32>,
    failing: BTreeSet<usize>,
    max_running: usize,
}

impl Workflow {
    fn name(i: usize) -> String {
        format!("n{i:02}")
    }

    fn config(&self) -> ConfigFile {
        let mut builder = ConfigFileBuilder::new().max_running(self.max_running);
        for (i, deps) in self.inputs.iter().enumerate() {
            let mut node = NodeConfigBuilder::new(&format!("make f{i}"))
                .output(&format!("f{i}"))
                .retries(self.retries[i]);
            if self.reads_src[i] {
                node = node.input("src");
            }
            for dep in deps {
                node = node.input(&format!("f{dep}"));
            }
            builder = builder.with_node(&Self::name(i), node.build());
        }
        builder.build()
    }
}

fn workflow_strategy(max_nodes: usize) -> impl Strategy<Value = Workflow> {
    (1..=max_nodes).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(any::<bool>(), n),
            proptest::collection::vec(0..=2u32, n),
            proptest::collection::btree_set(0..n, 0..=n.min(3)),
            1..=3usize,
        )
            .prop_map(move |(raw_deps, reads_src, retries, failing, max_running)| {
                let inputs = raw_deps
                    .into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            deps.into_iter().map(|d| d % i).collect()
                        }
                    })
                    .collect();
                Workflow {
                    inputs,
                    reads_src,
                    retries,
                    failing,
                    max_running,
                }
            })
    })
}

/// Checks ordering and collection rules as the run happens.
#[derive(Clone, Default)]
struct InvariantHook {
    violations: Arc<Mutex<Vec<String>>>,
}

impl InvariantHook {
    fn violation(&self, msg: String) {
        self.violations.lock().unwrap().push(msg);
    }
}

impl Hook for InvariantHook {
    fn name(&self) -> &str {
        "invariants"
    }

    fn node_submit(&mut self, dag: &Dag, node: &DagNode, _task: &BatchTask) -> HookResult {
        for f in &node.inputs {
            let file = dag.file(*f);
            if !file.state.is_available() {
                self.violation(format!(
                    "{} submitted while {} is {:?}",
                    node.name,
                    file.path.display(),
                    file.state
                ));
            }
        }
        Ok(())
    }

    fn file_deleted(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        if file.needed_by != 0 {
            self.violation(format!(
                "{} deleted while still needed by {}",
                file.path.display(),
                file.needed_by
            ));
        }
        if !file.is_intermediate() {
            self.violation(format!("{} deleted but is not intermediate", file.path.display()));
        }
        for c in &file.consumers {
            let consumer = dag.node(*c);
            if !consumer.state.is_terminal() {
                self.violation(format!(
                    "{} deleted while {} is {:?}",
                    file.path.display(),
                    consumer.name,
                    consumer.state
                ));
            }
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_workflows_run_to_a_consistent_end(wf in workflow_strategy(8)) {
        let cfg = wf.config();
        let fs = MockFileSystem::new();
        fs.add_file("src", "seed");

        let mut executor = FakeExecutor::new(fs.clone());
        for i in &wf.failing {
            executor = executor.always_fail(&Workflow::name(*i), 1);
        }
        let exec = executor.log();

        let hook = InvariantHook::default();
        let violations = Arc::clone(&hook.violations);
        let hooks: Vec<Box<dyn Hook>> = vec![Box::new(hook)];
        let core = core_with(&cfg, &fs, hooks, test_options(&cfg));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let report = rt
            .block_on(with_timeout(Runtime::new(core, executor).run()))
            .unwrap();

        let violations = violations.lock().unwrap().clone();
        prop_assert!(violations.is_empty(), "{:?}", violations);
        prop_assert!(exec.max_in_flight() <= wf.max_running);

        for (i, limit) in wf.retries.iter().enumerate() {
            let name = Workflow::name(i);
            let node = report.node(&name).unwrap();
            prop_assert!(exec.submissions_of(&name) as u32 <= limit + 1);

            let upstream_ok = wf.inputs[i].iter().all(|dep| {
                report.node(&Workflow::name(*dep)).unwrap().state == NodeState::Complete
            });

            if !upstream_ok {
                // Blocked behind a failure: never submitted.
                prop_assert_eq!(node.state, NodeState::Waiting);
                prop_assert_eq!(exec.submissions_of(&name), 0);
            } else if wf.failing.contains(&i) {
                prop_assert_eq!(node.state, NodeState::Failed);
                prop_assert_eq!(exec.submissions_of(&name) as u32, limit + 1);
            } else {
                prop_assert_eq!(node.state, NodeState::Complete);
            }
        }

        if wf.failing.is_empty() {
            prop_assert_eq!(report.verdict, DagVerdict::Complete);
            for file in &report.files {
                prop_assert_ne!(file.state, FileState::Expect);
            }
        } else {
            prop_assert_eq!(report.verdict, DagVerdict::Failed);
        }
    }
}
