//! Engine error types
//!
//! Step failures are not errors: they are reported through `StepResult` and
//! `ExecutionResult::status`. These variants cover everything else.

use crate::plan::PlanError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler task failed: {0}")]
    SchedulerPanicked(String),

    #[error("Step task failed: {0}")]
    StepTask(String),

    #[error("No runnable steps left, blocked: {}", .0.join(", "))]
    Stalled(Vec<String>),
}
