//! In-process job queue with a single sequential worker

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::{JobHandle, JobQueue, QueueError};
use crate::engine::{EngineError, ExecutionEngine, ExecutionResult};
use crate::plan::Plan;

struct QueuedJob {
    plan: Plan,
    reply: oneshot::Sender<Result<ExecutionResult, EngineError>>,
}

/// Runs submitted plans in submission order on one worker task
///
/// The worker creates the `queued` run record of a plan if the submitter did
/// not, and stops once the queue is dropped and every accepted plan has run.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
}

impl InMemoryJobQueue {
    /// Spawn the worker on the current runtime
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`InMemoryJobQueue::with_handle`] there.
    pub fn new(engine: ExecutionEngine) -> Self {
        Self::with_handle(engine, &Handle::current())
    }

    /// Spawn the worker on the runtime behind `handle`
    pub fn with_handle(engine: ExecutionEngine, handle: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<QueuedJob>();
        handle.spawn(work(engine, receiver));
        Self { sender }
    }
}

async fn work(engine: ExecutionEngine, mut receiver: mpsc::UnboundedReceiver<QueuedJob>) {
    while let Some(job) = receiver.recv().await {
        let execution_id = job.plan.execution_id();
        debug!(%execution_id, "Running queued plan");

        let result = match engine.dispatch(job.plan).await {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(r) => info!(%execution_id, status = %r.status, "Queued plan finished"),
            Err(e) => error!(%execution_id, error = %e, "Queued plan failed to run"),
        }
        // The submitter may have dropped its handle
        let _ = job.reply.send(result);
    }
    debug!("In-memory job queue worker stopped");
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("execution_id", &self.plan.execution_id())
            .finish()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn submit(&self, plan: Plan) -> Result<JobHandle, QueueError> {
        let execution_id = plan.execution_id();
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(QueuedJob { plan, reply })
            .map_err(|_| QueueError::Closed)?;

        Ok(JobHandle::Tracked {
            execution_id,
            receiver,
        })
    }
}
