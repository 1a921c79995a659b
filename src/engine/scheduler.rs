//! Plan scheduling loop
//!
//! Each submitted plan gets its own orchestration task. The task keeps three
//! buckets (remaining, running, completed), dispatches every step whose
//! predecessor has completed onto the shared step pool, and waits for the next
//! step to finish. The step pool is a single `Semaphore` shared by every plan
//! run through the same engine, so `max_concurrent_steps` bounds the total
//! number of executing steps while orchestration tasks never hold a permit.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::error::EngineError;
use super::registry::StepExecutorRegistry;
use super::result::{ExecutionResult, RunStatus, StepResult};
use super::step_runner::{execute_step, CANCELLED_MESSAGE};
use crate::plan::{EngineConfig, FailurePolicy, Plan, Step};
use crate::store::{ExecutionStore, StoreError};

/// Final state of one dispatched step, reported back to the loop
#[derive(Debug)]
struct StepOutcome {
    step_id: String,
    step_exec_id: Uuid,
    blocking: bool,
    result: StepResult,
    attempts: u32,
}

type StepTaskResult = Result<StepOutcome, StoreError>;

#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<StepExecutorRegistry>,
    store: Arc<dyn ExecutionStore>,
    step_slots: Arc<Semaphore>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<StepExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        let permits = config.max_concurrent_steps.max(1);
        Self {
            registry,
            store,
            step_slots: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<StepExecutorRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist a `queued` run record for `plan` and start executing it
    pub async fn submit(&self, plan: Plan) -> Result<ExecutionHandle, EngineError> {
        self.store
            .create_execution(plan.execution_id(), plan.test_id(), RunStatus::Queued)
            .await?;
        Ok(self.start(plan))
    }

    /// Start `plan`, persisting a `queued` run record first unless one exists
    ///
    /// Queue workers use this so plans submitted directly and plans whose
    /// record was created upstream (reruns) both run.
    pub async fn dispatch(&self, plan: Plan) -> Result<ExecutionHandle, EngineError> {
        let execution_id = plan.execution_id();
        if self.store.execution(execution_id).await?.is_none() {
            self.store
                .create_execution(execution_id, plan.test_id(), RunStatus::Queued)
                .await?;
        }
        Ok(self.start(plan))
    }

    /// Start executing a plan whose run record already exists
    pub fn start(&self, plan: Plan) -> ExecutionHandle {
        let execution_id = plan.execution_id();
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { engine.drive(plan, token).await });

        ExecutionHandle {
            execution_id,
            cancel,
            task,
        }
    }

    /// Submit `plan` and wait for its result
    pub async fn run(&self, plan: Plan) -> Result<ExecutionResult, EngineError> {
        self.submit(plan).await?.wait().await
    }

    #[instrument(skip_all, fields(execution_id = %plan.execution_id()))]
    async fn drive(
        self,
        plan: Plan,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let execution_id = plan.execution_id();
        match self.schedule(&plan, &cancel).await {
            Ok(result) => {
                info!(status = %result.status, cancelled = result.cancelled, "Execution finished");
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "Execution aborted by engine error");
                if let Err(mark_err) = self
                    .store
                    .update_execution_status(execution_id, RunStatus::Failed)
                    .await
                {
                    warn!(error = %mark_err, "Could not mark execution as failed");
                }
                Err(e)
            }
        }
    }

    async fn schedule(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let execution_id = plan.execution_id();
        self.store
            .update_execution_status(execution_id, RunStatus::Running)
            .await?;
        info!(steps = plan.len(), "Execution started");

        let step_cancel = cancel.child_token();
        let mut remaining: Vec<&Step> = plan.steps().iter().collect();
        let mut running: HashMap<String, Uuid> = HashMap::new();
        let mut completed: HashMap<String, StepResult> = HashMap::new();
        let mut tasks: JoinSet<StepTaskResult> = JoinSet::new();
        let mut any_failed = false;

        loop {
            let (ready, blocked): (Vec<&Step>, Vec<&Step>) = remaining
                .into_iter()
                .partition(|step| is_ready(step, &completed));
            remaining = blocked;

            for step in ready {
                let step_exec_id = Uuid::new_v4();
                self.store
                    .create_execution_step(step_exec_id, execution_id, &step.id, RunStatus::Queued)
                    .await?;
                debug!(step_id = %step.id, %step_exec_id, "Dispatching step");

                running.insert(step.id.clone(), step_exec_id);
                let span = tracing::info_span!("step", step_id = %step.id);
                tasks.spawn(
                    self.step_task(step.clone(), step_exec_id, step_cancel.clone())
                        .instrument(span),
                );
            }

            if running.is_empty() {
                if remaining.is_empty() {
                    break;
                }
                return Err(EngineError::Stalled(
                    remaining.iter().map(|s| s.id.clone()).collect(),
                ));
            }

            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(in_flight = running.len(), "Execution cancelled");
                    for outcome in drain(&mut tasks).await? {
                        self.persist_outcome(&outcome).await?;
                        completed.insert(outcome.step_id, outcome.result);
                    }
                    self.store
                        .update_execution_status(execution_id, RunStatus::Failed)
                        .await?;
                    return Ok(ExecutionResult {
                        execution_id,
                        status: RunStatus::Failed,
                        step_results: completed,
                        cancelled: true,
                    });
                }
                joined = tokio::time::timeout(self.config.poll_interval(), tasks.join_next()) => joined,
            };

            let outcome = match joined {
                Err(_) => continue,
                Ok(None) => {
                    return Err(EngineError::StepTask(
                        "step pool emptied while steps were running".to_string(),
                    ))
                }
                Ok(Some(joined)) => joined.map_err(|e| EngineError::StepTask(e.to_string()))??,
            };

            running.remove(&outcome.step_id);
            self.persist_outcome(&outcome).await?;

            let failed = !outcome.result.success;
            let aborts = failed && self.aborts_on(&outcome);
            if failed {
                any_failed = true;
                warn!(
                    step_id = %outcome.step_id,
                    attempts = outcome.attempts,
                    error = outcome.result.error.as_deref().unwrap_or("unknown"),
                    "Step failed"
                );
            } else {
                info!(step_id = %outcome.step_id, attempts = outcome.attempts, "Step succeeded");
            }
            completed.insert(outcome.step_id, outcome.result);

            if aborts {
                warn!(
                    in_flight = running.len(),
                    never_started = remaining.len(),
                    "Aborting execution after step failure"
                );
                step_cancel.cancel();
                for abandoned in drain(&mut tasks).await? {
                    self.persist_outcome(&abandoned).await?;
                }
                self.store
                    .update_execution_status(execution_id, RunStatus::Failed)
                    .await?;
                return Ok(ExecutionResult {
                    execution_id,
                    status: RunStatus::Failed,
                    step_results: completed,
                    cancelled: false,
                });
            }
        }

        let status = if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        self.store
            .update_execution_status(execution_id, status)
            .await?;

        Ok(ExecutionResult {
            execution_id,
            status,
            step_results: completed,
            cancelled: false,
        })
    }

    fn aborts_on(&self, outcome: &StepOutcome) -> bool {
        match self.config.failure_policy {
            FailurePolicy::AbortOnFailure => true,
            FailurePolicy::RespectBlocking => outcome.blocking,
        }
    }

    fn step_task(
        &self,
        step: Step,
        step_exec_id: Uuid,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = StepTaskResult> + Send + 'static {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let slots = self.step_slots.clone();

        async move {
            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = slots.acquire() => permit.ok(),
            };

            let (result, attempts) = match permit {
                Some(_permit) => {
                    store.mark_execution_step_running(step_exec_id).await?;
                    execute_step(&registry, &step, &cancel).await
                }
                None => (StepResult::failure(CANCELLED_MESSAGE), 0),
            };

            Ok(StepOutcome {
                step_id: step.id,
                step_exec_id,
                blocking: step.blocking,
                result,
                attempts,
            })
        }
    }

    async fn persist_outcome(&self, outcome: &StepOutcome) -> Result<(), StoreError> {
        let status = if outcome.result.success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.store
            .update_execution_step_result(
                outcome.step_exec_id,
                status,
                &outcome.result.to_result_json(),
                outcome.attempts,
            )
            .await
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("available_slots", &self.step_slots.available_permits())
            .field("config", &self.config)
            .finish()
    }
}

fn is_ready(step: &Step, completed: &HashMap<String, StepResult>) -> bool {
    step.depends_on
        .as_ref()
        .map(|dep| completed.contains_key(dep))
        .unwrap_or(true)
}

/// Wait for every in-flight step task to report
async fn drain(tasks: &mut JoinSet<StepTaskResult>) -> Result<Vec<StepOutcome>, EngineError> {
    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.map_err(|e| EngineError::StepTask(e.to_string()))??);
    }
    Ok(outcomes)
}

/// Running plan execution
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<Result<ExecutionResult, EngineError>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Stop dispatching and cancel in-flight steps
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this execution when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<ExecutionResult, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::SchedulerPanicked(e.to_string()))?
    }
}
