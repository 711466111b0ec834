use std::sync::{Arc, Mutex};

use anyhow::bail;
use batchdag::dag::{Dag, DagFile, DagNode};
use batchdag::exec::{BatchResult, BatchTask};
use batchdag::hooks::{Hook, HookResult, LoopControl};

/// Shared, ordered list of hook events such as `"node_check:A"` or
/// `"dag_end"`.
#[derive(Debug, Clone, Default)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

/// One configured veto. A `None` subject matches any node or file; a
/// `None` budget never runs out.
struct Veto {
    event: String,
    subject: Option<String>,
    remaining: Option<usize>,
}

/// Hook that records every event and vetoes the ones it is told to.
pub struct RecordingHook {
    name: String,
    log: HookLog,
    vetoes: Vec<Veto>,
    loops_left: usize,
}

impl RecordingHook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: HookLog::default(),
            vetoes: Vec::new(),
            loops_left: 0,
        }
    }

    /// Share an existing log, e.g. to see the interleaving of two hooks.
    pub fn with_log(mut self, log: HookLog) -> Self {
        self.log = log;
        self
    }

    pub fn veto(self, event: &str, subject: Option<&str>) -> Self {
        self.push_veto(event, subject, None)
    }

    /// Veto only the first `n` matching calls, then pass.
    pub fn veto_times(self, event: &str, subject: Option<&str>, n: usize) -> Self {
        self.push_veto(event, subject, Some(n))
    }

    fn push_veto(mut self, event: &str, subject: Option<&str>, remaining: Option<usize>) -> Self {
        self.vetoes.push(Veto {
            event: event.to_string(),
            subject: subject.map(str::to_string),
            remaining,
        });
        self
    }

    /// Answer `Continue` to the next `n` `dag_loop` calls.
    pub fn keep_looping(mut self, n: usize) -> Self {
        self.loops_left = n;
        self
    }

    pub fn log(&self) -> HookLog {
        self.log.clone()
    }

    pub fn boxed(self) -> Box<dyn Hook> {
        Box::new(self)
    }

    fn observe(&mut self, event: &str, subject: Option<&str>) -> HookResult {
        match subject {
            Some(s) => self.log.push(format!("{event}:{s}")),
            None => self.log.push(event.to_string()),
        }

        let matching = self.vetoes.iter_mut().find(|v| {
            v.event == event
                && (v.subject.is_none() || v.subject.as_deref() == subject)
                && v.remaining != Some(0)
        });
        if let Some(veto) = matching {
            if let Some(n) = veto.remaining.as_mut() {
                *n -= 1;
            }
            bail!("{} vetoes {event}", self.name);
        }
        Ok(())
    }

    fn file(&mut self, event: &str, file: &DagFile) -> HookResult {
        let path = file.path.display().to_string();
        self.observe(event, Some(&path))
    }
}

impl Hook for RecordingHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&mut self) -> HookResult {
        self.observe("create", None)
    }

    fn destroy(&mut self, _dag: &Dag) -> HookResult {
        self.observe("destroy", None)
    }

    fn dag_init(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_init", None)
    }

    fn dag_check(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_check", None)
    }

    fn dag_clean(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_clean", None)
    }

    fn dag_start(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_start", None)
    }

    fn dag_loop(&mut self, _dag: &Dag) -> LoopControl {
        if self.loops_left > 0 {
            self.loops_left -= 1;
            LoopControl::Continue
        } else {
            LoopControl::Stop
        }
    }

    fn dag_end(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_end", None)
    }

    fn dag_fail(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_fail", None)
    }

    fn dag_abort(&mut self, _dag: &Dag) -> HookResult {
        self.observe("dag_abort", None)
    }

    fn node_create(&mut self, _dag: &Dag, node: &DagNode) -> HookResult {
        self.observe("node_create", Some(&node.name))
    }

    fn node_check(&mut self, _dag: &Dag, node: &DagNode) -> HookResult {
        self.observe("node_check", Some(&node.name))
    }

    fn node_submit(&mut self, _dag: &Dag, node: &DagNode, _task: &BatchTask) -> HookResult {
        self.observe("node_submit", Some(&node.name))
    }

    fn node_end(&mut self, _dag: &Dag, node: &DagNode, _result: &BatchResult) -> HookResult {
        self.observe("node_end", Some(&node.name))
    }

    fn node_success(&mut self, _dag: &Dag, node: &DagNode, _result: &BatchResult) -> HookResult {
        self.observe("node_success", Some(&node.name))
    }

    fn node_fail(&mut self, _dag: &Dag, node: &DagNode) -> HookResult {
        self.observe("node_fail", Some(&node.name))
    }

    fn node_abort(&mut self, _dag: &Dag, node: &DagNode) -> HookResult {
        self.observe("node_abort", Some(&node.name))
    }

    fn batch_submit(&mut self, task: &mut BatchTask) -> HookResult {
        self.observe("batch_submit", Some(&task.node))
    }

    fn batch_retrieve(&mut self, result: &mut BatchResult) -> HookResult {
        self.observe("batch_retrieve", Some(&result.task_id.to_string()))
    }

    fn file_create(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_create", file)
    }

    fn file_expect(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_expect", file)
    }

    fn file_exist(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_exist", file)
    }

    fn file_complete(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_complete", file)
    }

    fn file_clean(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_clean", file)
    }

    fn file_deleted(&mut self, _dag: &Dag, file: &DagFile) -> HookResult {
        self.file("file_deleted", file)
    }
}
