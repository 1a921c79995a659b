//! Re-running the failed part of an execution
//!
//! Given failed execution-step ids, the resolver rebuilds a plan holding
//! those steps plus every step transitively gated on them, persists a fresh
//! `queued` run for it and hands it to the job queue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::result::RunStatus;
use crate::plan::{Plan, PlanError, Step};
use crate::queue::{JobHandle, JobQueue, QueueError};
use crate::store::{ExecutionStore, StepSource, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RerunError {
    #[error("Execution {0} has no failed steps to rerun")]
    NothingToRerun(Uuid),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Rerun plan is invalid: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to submit rerun: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug)]
pub struct RerunResult {
    /// Id of the new run
    pub execution_id: Uuid,
    pub handle: JobHandle,
}

pub struct RerunResolver {
    store: Arc<dyn ExecutionStore>,
    steps: Arc<dyn StepSource>,
    queue: Arc<dyn JobQueue>,
}

impl RerunResolver {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        steps: Arc<dyn StepSource>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            steps,
            queue,
        }
    }

    /// Rerun every step of `execution_id` whose record ended `failed`
    pub async fn rerun_failed(&self, execution_id: Uuid) -> Result<RerunResult, RerunError> {
        let failed = self.store.failed_step_exec_ids(execution_id).await?;
        self.rerun_failed_steps(execution_id, &failed).await
    }

    #[instrument(skip(self, failed_step_exec_ids), fields(failed = failed_step_exec_ids.len()))]
    pub async fn rerun_failed_steps(
        &self,
        execution_id: Uuid,
        failed_step_exec_ids: &[Uuid],
    ) -> Result<RerunResult, RerunError> {
        if failed_step_exec_ids.is_empty() {
            return Err(RerunError::NothingToRerun(execution_id));
        }

        let test_id = self
            .store
            .execution(execution_id)
            .await?
            .and_then(|record| record.test_id);
        let steps = self.collect_steps(failed_step_exec_ids).await?;
        let plan = match test_id {
            Some(test_id) => Plan::for_test(test_id, steps)?,
            None => Plan::new(steps)?,
        };

        let new_id = plan.execution_id();
        self.store
            .create_execution(new_id, plan.test_id(), RunStatus::Queued)
            .await?;
        info!(rerun_execution_id = %new_id, steps = plan.len(), "Submitting rerun");

        match self.queue.submit(plan).await {
            Ok(handle) => Ok(RerunResult {
                execution_id: new_id,
                handle,
            }),
            Err(e) => {
                if let Err(mark_err) = self
                    .store
                    .update_execution_status(new_id, RunStatus::Failed)
                    .await
                {
                    warn!(error = %mark_err, "Could not mark unsubmitted rerun as failed");
                }
                Err(e.into())
            }
        }
    }

    /// Failed steps first, then their dependents, without duplicates
    async fn collect_steps(&self, failed_step_exec_ids: &[Uuid]) -> Result<Vec<Step>, StoreError> {
        let mut failed = Vec::with_capacity(failed_step_exec_ids.len());
        for id in failed_step_exec_ids {
            failed.push(self.steps.find_step_by_execution_step_id(*id).await?);
        }

        let failed_ids: Vec<String> = failed.iter().map(|s| s.id.clone()).collect();
        let dependents = self
            .steps
            .find_dependent_steps_recursively(&failed_ids)
            .await?;

        let mut seen = HashSet::new();
        let mut steps: Vec<Step> = failed
            .into_iter()
            .chain(dependents)
            .filter(|step| seen.insert(step.id.clone()))
            .collect();

        // Predecessors that succeeded last time are not rerun
        for step in &mut steps {
            if step
                .depends_on
                .as_ref()
                .is_some_and(|dep| !seen.contains(dep))
            {
                step.depends_on = None;
            }
        }

        Ok(steps)
    }
}

impl std::fmt::Debug for RerunResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerunResolver").finish_non_exhaustive()
    }
}
