//! Asynchronous plan submission
//!
//! A `JobQueue` accepts plans and hands them to an `ExecutionEngine` later.
//! Workers persist the `queued` run record when the submitter has not done so
//! already, as the rerun resolver does. Two flavours exist:
//!
//! - `InMemoryJobQueue` runs plans one at a time on a worker task and returns
//!   a handle that resolves to the real result.
//! - `BrokerJobQueue` serializes plans onto a `PlanBroker`; a separate
//!   `QueueWorker` pops and runs them. Its handles resolve immediately to a
//!   placeholder result since the submitter cannot observe the run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::engine::{EngineError, ExecutionEngine, ExecutionResult};
use crate::plan::{Plan, QueueConfig};

pub mod broker;
pub mod in_memory;

pub use broker::{BrokerJobQueue, ChannelBroker, PlanBroker, QueueWorker};
pub use in_memory::InMemoryJobQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,

    #[error("Broker is full (capacity {0})")]
    Full(usize),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Failed to serialize plan: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Malformed plan payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, plan: Plan) -> Result<JobHandle, QueueError>;
}

/// Handle to a submitted plan
#[derive(Debug)]
pub enum JobHandle {
    /// Resolves once the queue's worker has run the plan
    Tracked {
        execution_id: Uuid,
        receiver: oneshot::Receiver<Result<ExecutionResult, EngineError>>,
    },
    /// Already resolved with a `queued` placeholder
    Detached(ExecutionResult),
}

impl JobHandle {
    pub fn execution_id(&self) -> Uuid {
        match self {
            JobHandle::Tracked { execution_id, .. } => *execution_id,
            JobHandle::Detached(result) => result.execution_id,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, JobHandle::Detached(_))
    }

    pub async fn wait(self) -> Result<ExecutionResult, QueueError> {
        match self {
            JobHandle::Tracked { receiver, .. } => {
                let result = receiver.await.map_err(|_| QueueError::Closed)?;
                Ok(result?)
            }
            JobHandle::Detached(result) => Ok(result),
        }
    }
}

/// Build the queue described by `config`
///
/// Broker-backed queues also return the worker that drains them; the caller
/// decides where it runs.
pub fn from_config(
    config: &QueueConfig,
    engine: ExecutionEngine,
) -> (Arc<dyn JobQueue>, Option<QueueWorker>) {
    match config {
        QueueConfig::Memory => {
            let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(engine));
            (queue, None)
        }
        QueueConfig::Broker { capacity } => {
            let broker: Arc<dyn PlanBroker> = Arc::new(ChannelBroker::new(*capacity));
            let queue: Arc<dyn JobQueue> = Arc::new(BrokerJobQueue::new(broker.clone()));
            (queue, Some(QueueWorker::new(broker, engine)))
        }
    }
}
