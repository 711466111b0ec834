// src/hooks/dispatcher.rs

use std::fmt;

use tracing::{debug, warn};

use super::{Hook, HookEvent, HookResult, LoopControl};
use crate::dag::{Dag, DagFile, DagNode};
use crate::errors::{BatchdagError, Result};
use crate::exec::{BatchResult, BatchTask};

/// Ordered registry of hooks.
///
/// Every event is delivered to each hook in registration order. The first
/// hook that returns an error stops delivery for that event and the error is
/// returned as [`BatchdagError::HookVeto`].
///
/// Registration closes once [`create`](Self::create) has run; the hook set
/// is fixed for the rest of the run.
#[derive(Default)]
pub struct HookDispatcher {
    hooks: Vec<Box<dyn Hook>>,
    sealed: bool,
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("hooks", &self.names())
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) -> Result<()> {
        if self.sealed {
            return Err(BatchdagError::ConfigError(format!(
                "cannot register hook '{}': registration is closed",
                hook.name()
            )));
        }
        debug!(hook = hook.name(), position = self.hooks.len(), "hook registered");
        self.hooks.push(hook);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn dispatch<F>(&mut self, event: HookEvent, mut call: F) -> Result<()>
    where
        F: FnMut(&mut dyn Hook) -> HookResult,
    {
        for hook in self.hooks.iter_mut() {
            if let Err(err) = call(hook.as_mut()) {
                warn!(hook = hook.name(), %event, error = %err, "hook vetoed event");
                return Err(BatchdagError::HookVeto {
                    hook: hook.name().to_string(),
                    event,
                    reason: format!("{err:#}"),
                });
            }
        }
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        self.sealed = true;
        self.dispatch(HookEvent::Create, |h| h.create())
    }

    pub fn destroy(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::Destroy, |h| h.destroy(dag))
    }

    pub fn dag_init(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagInit, |h| h.dag_init(dag))
    }

    pub fn dag_check(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagCheck, |h| h.dag_check(dag))
    }

    pub fn dag_clean(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagClean, |h| h.dag_clean(dag))
    }

    pub fn dag_start(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagStart, |h| h.dag_start(dag))
    }

    /// Every hook is asked; any `Continue` keeps the loop alive.
    pub fn dag_loop(&mut self, dag: &Dag) -> LoopControl {
        let mut control = LoopControl::Stop;
        for hook in self.hooks.iter_mut() {
            if hook.dag_loop(dag) == LoopControl::Continue {
                control = LoopControl::Continue;
            }
        }
        control
    }

    pub fn dag_end(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagEnd, |h| h.dag_end(dag))
    }

    pub fn dag_fail(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagFail, |h| h.dag_fail(dag))
    }

    pub fn dag_abort(&mut self, dag: &Dag) -> Result<()> {
        self.dispatch(HookEvent::DagAbort, |h| h.dag_abort(dag))
    }

    pub fn node_create(&mut self, dag: &Dag, node: &DagNode) -> Result<()> {
        self.dispatch(HookEvent::NodeCreate, |h| h.node_create(dag, node))
    }

    pub fn node_check(&mut self, dag: &Dag, node: &DagNode) -> Result<()> {
        self.dispatch(HookEvent::NodeCheck, |h| h.node_check(dag, node))
    }

    pub fn node_submit(&mut self, dag: &Dag, node: &DagNode, task: &BatchTask) -> Result<()> {
        self.dispatch(HookEvent::NodeSubmit, |h| h.node_submit(dag, node, task))
    }

    pub fn node_end(&mut self, dag: &Dag, node: &DagNode, result: &BatchResult) -> Result<()> {
        self.dispatch(HookEvent::NodeEnd, |h| h.node_end(dag, node, result))
    }

    pub fn node_success(&mut self, dag: &Dag, node: &DagNode, result: &BatchResult) -> Result<()> {
        self.dispatch(HookEvent::NodeSuccess, |h| h.node_success(dag, node, result))
    }

    pub fn node_fail(&mut self, dag: &Dag, node: &DagNode) -> Result<()> {
        self.dispatch(HookEvent::NodeFail, |h| h.node_fail(dag, node))
    }

    pub fn node_abort(&mut self, dag: &Dag, node: &DagNode) -> Result<()> {
        self.dispatch(HookEvent::NodeAbort, |h| h.node_abort(dag, node))
    }

    pub fn batch_submit(&mut self, task: &mut BatchTask) -> Result<()> {
        self.dispatch(HookEvent::BatchSubmit, |h| h.batch_submit(task))
    }

    pub fn batch_retrieve(&mut self, result: &mut BatchResult) -> Result<()> {
        self.dispatch(HookEvent::BatchRetrieve, |h| h.batch_retrieve(result))
    }

    pub fn file_create(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileCreate, |h| h.file_create(dag, file))
    }

    pub fn file_expect(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileExpect, |h| h.file_expect(dag, file))
    }

    pub fn file_exist(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileExist, |h| h.file_exist(dag, file))
    }

    pub fn file_complete(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileComplete, |h| h.file_complete(dag, file))
    }

    pub fn file_clean(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileClean, |h| h.file_clean(dag, file))
    }

    pub fn file_deleted(&mut self, dag: &Dag, file: &DagFile) -> Result<()> {
        self.dispatch(HookEvent::FileDeleted, |h| h.file_deleted(dag, file))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::bail;

    use super::*;
    use crate::dag::DagBuilder;
    use crate::dag::test_support::node_cfg;

    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        veto_check: bool,
        keep_looping: bool,
    }

    impl Probe {
        fn boxed(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                name,
                log: Arc::clone(log),
                veto_check: false,
                keep_looping: false,
            })
        }
    }

    impl Hook for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn dag_check(&mut self, _dag: &Dag) -> HookResult {
            self.log.lock().unwrap().push(format!("{}:dag_check", self.name));
            if self.veto_check {
                bail!("not today");
            }
            Ok(())
        }

        fn dag_loop(&mut self, _dag: &Dag) -> LoopControl {
            self.log.lock().unwrap().push(format!("{}:dag_loop", self.name));
            if self.keep_looping {
                LoopControl::Continue
            } else {
                LoopControl::Stop
            }
        }

        fn batch_submit(&mut self, task: &mut BatchTask) -> HookResult {
            task.command = format!("{}({})", self.name, task.command);
            Ok(())
        }
    }

    fn dag() -> Dag {
        let mut b = DagBuilder::new(0);
        b.add_node("A", &node_cfg("true", &[], &["out"])).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn first_veto_wins_and_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = Probe::boxed("first", &log);
        first.veto_check = true;

        let mut d = HookDispatcher::new();
        d.register(first).unwrap();
        d.register(Probe::boxed("second", &log)).unwrap();

        let err = d.dag_check(&dag()).unwrap_err();
        match err {
            BatchdagError::HookVeto { hook, event, reason } => {
                assert_eq!(hook, "first");
                assert_eq!(event, HookEvent::DagCheck);
                assert_eq!(reason, "not today");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["first:dag_check"]);
    }

    #[test]
    fn batch_rewrites_apply_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = HookDispatcher::new();
        d.register(Probe::boxed("outer", &log)).unwrap();
        d.register(Probe::boxed("inner", &log)).unwrap();

        let mut task = BatchTask {
            node: "A".into(),
            command: "cmd".into(),
            inputs: vec![],
            outputs: vec![],
            resources: Default::default(),
            attempt: 1,
        };
        d.batch_submit(&mut task).unwrap();
        assert_eq!(task.command, "inner(outer(cmd))");
    }

    #[test]
    fn any_continue_keeps_loop_alive_and_all_hooks_are_asked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut looping = Probe::boxed("looping", &log);
        looping.keep_looping = true;

        let mut d = HookDispatcher::new();
        d.register(looping).unwrap();
        d.register(Probe::boxed("idle", &log)).unwrap();

        assert_eq!(d.dag_loop(&dag()), LoopControl::Continue);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(HookDispatcher::new().dag_loop(&dag()), LoopControl::Stop);
    }

    #[test]
    fn registration_closes_after_create() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = HookDispatcher::new();
        d.register(Probe::boxed("early", &log)).unwrap();
        d.create().unwrap();

        let err = d.register(Probe::boxed("late", &log)).unwrap_err();
        assert!(matches!(err, BatchdagError::ConfigError(_)));
        assert_eq!(d.names(), vec!["early"]);
    }
}
