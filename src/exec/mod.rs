// src/exec/mod.rs

//! Task execution: the [`Executor`] interface and the local process
//! implementation.

pub mod backend;
pub mod local;
pub mod task_runner;

pub use backend::{
    BatchOutcome, BatchResult, BatchTask, BoxFuture, Executor, ResourceUsage, SubmitOutcome,
    TaskId,
};
pub use local::LocalExecutor;
