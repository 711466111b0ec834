// src/hooks/mod.rs

//! Lifecycle hooks.
//!
//! A [`Hook`] observes DAG, node, batch and file transitions. Every callback
//! defaults to a no-op success, so a hook implements only the events it
//! cares about. Returning an error vetoes the transition; what a veto means
//! depends on the event and is decided by the engine, not by the hook.
//!
//! Hooks never change node or file state themselves. The two batch-level
//! callbacks are the exception to "observe only": they may rewrite the task
//! before submission and the result before the engine consumes it.

use std::fmt;
use std::sync::Arc;

use crate::config::model::HooksSection;
use crate::dag::{Dag, DagFile, DagNode};
use crate::exec::{BatchResult, BatchTask};
use crate::fs::FileSystem;

pub mod archive;
pub mod dispatcher;
pub mod resources;
pub mod wrapper;

pub use archive::ArchiveHook;
pub use dispatcher::HookDispatcher;
pub use resources::ResourceCheckHook;
pub use wrapper::WrapperHook;

/// Any error is a veto.
pub type HookResult = anyhow::Result<()>;

/// Answer of the dag-level `loop` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopControl {
    /// Keep the scheduler loop alive even with nothing running or ready.
    Continue,
    #[default]
    Stop,
}

/// Every event a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Create,
    Destroy,
    DagInit,
    DagCheck,
    DagClean,
    DagStart,
    DagEnd,
    DagFail,
    DagAbort,
    NodeCreate,
    NodeCheck,
    NodeSubmit,
    NodeEnd,
    NodeSuccess,
    NodeFail,
    NodeAbort,
    BatchSubmit,
    BatchRetrieve,
    FileCreate,
    FileExpect,
    FileExist,
    FileComplete,
    FileClean,
    FileDeleted,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HookEvent::Create => "create",
            HookEvent::Destroy => "destroy",
            HookEvent::DagInit => "dag_init",
            HookEvent::DagCheck => "dag_check",
            HookEvent::DagClean => "dag_clean",
            HookEvent::DagStart => "dag_start",
            HookEvent::DagEnd => "dag_end",
            HookEvent::DagFail => "dag_fail",
            HookEvent::DagAbort => "dag_abort",
            HookEvent::NodeCreate => "node_create",
            HookEvent::NodeCheck => "node_check",
            HookEvent::NodeSubmit => "node_submit",
            HookEvent::NodeEnd => "node_end",
            HookEvent::NodeSuccess => "node_success",
            HookEvent::NodeFail => "node_fail",
            HookEvent::NodeAbort => "node_abort",
            HookEvent::BatchSubmit => "batch_submit",
            HookEvent::BatchRetrieve => "batch_retrieve",
            HookEvent::FileCreate => "file_create",
            HookEvent::FileExpect => "file_expect",
            HookEvent::FileExist => "file_exist",
            HookEvent::FileComplete => "file_complete",
            HookEvent::FileClean => "file_clean",
            HookEvent::FileDeleted => "file_deleted",
        };
        f.write_str(s)
    }
}

/// A named set of optional lifecycle callbacks.
#[allow(unused_variables)]
pub trait Hook: Send {
    fn name(&self) -> &str;

    /// Hook is being set up, before any DAG event.
    fn create(&mut self) -> HookResult {
        Ok(())
    }

    fn destroy(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_init(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_check(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_clean(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_start(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    /// Consulted once per scheduler iteration.
    fn dag_loop(&mut self, dag: &Dag) -> LoopControl {
        LoopControl::Stop
    }

    fn dag_end(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_fail(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn dag_abort(&mut self, dag: &Dag) -> HookResult {
        Ok(())
    }

    fn node_create(&mut self, dag: &Dag, node: &DagNode) -> HookResult {
        Ok(())
    }

    fn node_check(&mut self, dag: &Dag, node: &DagNode) -> HookResult {
        Ok(())
    }

    fn node_submit(&mut self, dag: &Dag, node: &DagNode, task: &BatchTask) -> HookResult {
        Ok(())
    }

    fn node_end(&mut self, dag: &Dag, node: &DagNode, result: &BatchResult) -> HookResult {
        Ok(())
    }

    fn node_success(&mut self, dag: &Dag, node: &DagNode, result: &BatchResult) -> HookResult {
        Ok(())
    }

    /// A submission or execution attempt failed. `node.state` already shows
    /// whether it will be retried (`WAITING`) or not (`FAILED`).
    fn node_fail(&mut self, dag: &Dag, node: &DagNode) -> HookResult {
        Ok(())
    }

    fn node_abort(&mut self, dag: &Dag, node: &DagNode) -> HookResult {
        Ok(())
    }

    /// May rewrite the task before it reaches the executor.
    fn batch_submit(&mut self, task: &mut BatchTask) -> HookResult {
        Ok(())
    }

    /// May rewrite the result before the engine consumes it.
    fn batch_retrieve(&mut self, result: &mut BatchResult) -> HookResult {
        Ok(())
    }

    fn file_create(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }

    fn file_expect(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }

    fn file_exist(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }

    fn file_complete(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }

    /// Last chance to persist the file before it is deleted.
    fn file_clean(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }

    fn file_deleted(&mut self, dag: &Dag, file: &DagFile) -> HookResult {
        Ok(())
    }
}

/// Builtin hooks enabled by `[hooks.*]`, in a fixed order: resource check,
/// wrapper, archive.
pub fn builtin_hooks(cfg: &HooksSection, fs: Arc<dyn FileSystem>) -> Vec<Box<dyn Hook>> {
    let mut hooks: Vec<Box<dyn Hook>> = Vec::new();
    if let Some(limits) = cfg.resources {
        hooks.push(Box::new(ResourceCheckHook::new(limits)));
    }
    if let Some(wrapper) = &cfg.wrapper {
        hooks.push(Box::new(WrapperHook::new(wrapper.command.clone())));
    }
    if let Some(archive) = &cfg.archive {
        hooks.push(Box::new(ArchiveHook::new(archive.dir.clone(), fs)));
    }
    hooks
}
