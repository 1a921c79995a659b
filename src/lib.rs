//! # Step Engine
//!
//! A dependency-aware execution engine for automated test steps.
//!
//! ## Features
//!
//! - **Single-predecessor dependencies** - A step starts once the step it depends on has completed
//! - **Bounded parallelism** - One shared step pool across every running plan
//! - **Retries** - Per-step attempt limit with a fixed delay
//! - **Persistence hooks** - Run and step status transitions go through `ExecutionStore`
//! - **Failed-step reruns** - Re-run failed steps together with everything gated on them
//! - **Job queues** - In-process or broker-backed asynchronous submission
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use step_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let plan = Plan::new(vec![
//!         Step::new("login", "http-request").with_param("url", "http://localhost:8080/login"),
//!         Step::new("checkout", "noop").depends_on("login"),
//!     ])?;
//!
//!     let engine = ExecutionEngine::new(
//!         Arc::new(StepExecutorRegistry::with_builtins()),
//!         Arc::new(MemoryStore::new()),
//!         EngineConfig::default(),
//!     );
//!     let result = engine.run(plan).await?;
//!
//!     println!("Execution completed: status={}", result.status);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod plan;
pub mod queue;
pub mod store;

// Re-export main types
pub use engine::{
    BlockingExecutor, EngineError, ExecutionEngine, ExecutionHandle, ExecutionResult, RerunError,
    RerunResolver, RerunResult, RunStatus, StepExecutor, StepExecutorRegistry, StepResult,
};
pub use plan::{
    EngineConfig, FailurePolicy, LoadError, Parameters, Plan, PlanError, PlanLoader, QueueConfig,
    Step,
};
pub use queue::{
    BrokerJobQueue, ChannelBroker, InMemoryJobQueue, JobHandle, JobQueue, PlanBroker, QueueError,
    QueueWorker,
};
pub use store::{
    ExecutionRecord, ExecutionStepRecord, ExecutionStore, MemoryStepSource, MemoryStore,
    StepSource, StoreError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        ExecutionEngine, ExecutionHandle, ExecutionResult, RerunResolver, RunStatus, StepExecutor,
        StepExecutorRegistry, StepResult,
    };
    pub use crate::plan::{EngineConfig, FailurePolicy, Parameters, Plan, PlanLoader, Step};
    pub use crate::queue::{InMemoryJobQueue, JobQueue};
    pub use crate::store::{ExecutionStore, MemoryStepSource, MemoryStore, StepSource};
}
