//! Broker-backed job queue
//!
//! Plans travel through a `PlanBroker` as JSON so a worker in another task
//! (or, with a networked broker, another process) can pick them up.
//! Deserializing a payload re-validates the plan.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JobHandle, JobQueue, QueueError};
use crate::engine::{ExecutionEngine, ExecutionResult};
use crate::plan::Plan;

/// Pause after a broker read error before polling again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Transport for serialized plans
#[async_trait]
pub trait PlanBroker: Send + Sync {
    async fn push(&self, payload: String) -> Result<(), QueueError>;

    /// Next payload, waiting for one to arrive. `None` once the broker is
    /// closed and drained.
    async fn pop(&self) -> Result<Option<String>, QueueError>;
}

/// Bounded in-process broker
#[derive(Debug, Clone)]
pub struct ChannelBroker {
    capacity: usize,
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = async_channel::bounded(capacity);
        Self {
            capacity,
            sender,
            receiver,
        }
    }

    /// Stop accepting pushes; already queued payloads can still be popped
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[async_trait]
impl PlanBroker for ChannelBroker {
    async fn push(&self, payload: String) -> Result<(), QueueError> {
        self.sender.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full(self.capacity),
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    async fn pop(&self) -> Result<Option<String>, QueueError> {
        Ok(self.receiver.recv().await.ok())
    }
}

/// Job queue that only enqueues; execution happens in a `QueueWorker`
#[derive(Clone)]
pub struct BrokerJobQueue {
    broker: Arc<dyn PlanBroker>,
}

impl BrokerJobQueue {
    pub fn new(broker: Arc<dyn PlanBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl JobQueue for BrokerJobQueue {
    async fn submit(&self, plan: Plan) -> Result<JobHandle, QueueError> {
        let execution_id = plan.execution_id();
        let payload = serde_json::to_string(&plan).map_err(QueueError::Serialize)?;
        self.broker.push(payload).await?;
        debug!(%execution_id, "Plan pushed to broker");

        Ok(JobHandle::Detached(ExecutionResult::placeholder(execution_id)))
    }
}

/// Pops serialized plans off a broker and runs them one at a time
pub struct QueueWorker {
    broker: Arc<dyn PlanBroker>,
    engine: ExecutionEngine,
}

impl QueueWorker {
    pub fn new(broker: Arc<dyn PlanBroker>, engine: ExecutionEngine) -> Self {
        Self { broker, engine }
    }

    /// Pop and run one plan. `None` when the broker is closed and empty.
    pub async fn run_next(&self) -> Result<Option<ExecutionResult>, QueueError> {
        match self.broker.pop().await? {
            Some(payload) => self.process(&payload).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drain the broker until it closes or `cancel` fires
    ///
    /// A plan already running when `cancel` fires is finished first.
    /// Malformed payloads and failed runs are logged and skipped. Returns the
    /// number of plans run.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        let mut processed = 0;
        info!("Queue worker started");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.broker.pop() => popped,
            };

            match popped {
                Ok(Some(payload)) => match self.process(&payload).await {
                    Ok(result) => {
                        processed += 1;
                        info!(
                            execution_id = %result.execution_id,
                            status = %result.status,
                            "Plan from broker finished"
                        );
                    }
                    Err(e) => warn!(error = %e, "Skipping plan from broker"),
                },
                Ok(None) => {
                    debug!("Broker closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Broker read failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(processed, "Queue worker stopped");
        processed
    }

    async fn process(&self, payload: &str) -> Result<ExecutionResult, QueueError> {
        let plan: Plan = serde_json::from_str(payload).map_err(QueueError::Malformed)?;
        Ok(self.engine.dispatch(plan).await?.wait().await?)
    }
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    #[tokio::test]
    async fn test_channel_broker_is_fifo() {
        let broker = ChannelBroker::new(4);
        broker.push("a".to_string()).await.unwrap();
        broker.push("b".to_string()).await.unwrap();

        assert_eq!(broker.len(), 2);
        assert_eq!(broker.pop().await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.pop().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_full_broker_rejects_push() {
        let broker = ChannelBroker::new(1);
        broker.push("a".to_string()).await.unwrap();

        let err = broker.push("b".to_string()).await.unwrap_err();
        assert!(matches!(err, QueueError::Full(1)));
    }

    #[tokio::test]
    async fn test_closed_broker_drains_then_ends() {
        let broker = ChannelBroker::new(2);
        broker.push("a".to_string()).await.unwrap();
        broker.close();

        assert!(matches!(
            broker.push("b".to_string()).await,
            Err(QueueError::Closed)
        ));
        assert_eq!(broker.pop().await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_submit_returns_placeholder() {
        let broker = Arc::new(ChannelBroker::new(4));
        let queue = BrokerJobQueue::new(broker.clone());
        let plan = Plan::new(vec![Step::new("s1", "noop")]).unwrap();
        let id = plan.execution_id();

        let handle = queue.submit(plan).await.unwrap();
        assert!(handle.is_detached());

        let result = handle.wait().await.unwrap();
        assert_eq!(result.execution_id, id);
        assert_eq!(result.status, crate::engine::RunStatus::Queued);
        assert!(result.step_results.is_empty());

        let payload = broker.pop().await.unwrap().unwrap();
        let decoded: Plan = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.execution_id(), id);
    }
}
