//! Step execution engine
//!
//! This module contains:
//! - `registry` - Executor name to `StepExecutor` mapping
//! - `actions` - Built-in executors (`noop`, `fail`, `sleep`, `http-request`)
//! - `step_runner` - Single-step execution with retry and cancellation
//! - `scheduler` - The plan scheduling loop and execution handles
//! - `result` - Step and execution result types
//! - `rerun` - Rebuilding and resubmitting the failed part of a run
//! - `error` - Engine error types

pub mod actions;
pub mod error;
pub mod registry;
pub mod rerun;
pub mod result;
pub mod scheduler;
pub mod step_runner;

pub use error::EngineError;
pub use registry::{BlockingExecutor, StepExecutor, StepExecutorRegistry};
pub use rerun::{RerunError, RerunResolver, RerunResult};
pub use result::{ExecutionResult, RunStatus, StepResult};
pub use scheduler::{ExecutionEngine, ExecutionHandle};
pub use step_runner::{execute_step, CANCELLED_MESSAGE};
