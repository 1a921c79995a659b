//! In-memory persistence
//!
//! `MemoryStore` keeps execution records in process and enforces the status
//! lifecycle (`queued -> running -> success|failed`, terminal states final).
//! Every accepted write is appended to a journal so callers can inspect the
//! exact order in which records moved.
//!
//! `MemoryStepSource` is a step catalog backed by a `MemoryStore` for the
//! execution-step to step mapping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionRecord, ExecutionStepRecord, ExecutionStore, StepSource, StoreError};
use crate::engine::RunStatus;
use crate::plan::{Plan, Step};

/// Record touched by a journaled write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    Execution(Uuid),
    Step {
        execution_id: Uuid,
        step_ref_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub record: RecordRef,
    pub status: RunStatus,
}

#[derive(Debug, Default)]
struct MemoryState {
    executions: HashMap<Uuid, ExecutionRecord>,
    steps: HashMap<Uuid, ExecutionStepRecord>,
    steps_by_execution: HashMap<Uuid, Vec<Uuid>>,
    journal: Vec<JournalEntry>,
}

impl MemoryState {
    fn step_mut(&mut self, id: Uuid) -> Result<&mut ExecutionStepRecord, StoreError> {
        self.steps.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            kind: "execution step",
            id: id.to_string(),
        })
    }

    fn journal_step(&mut self, id: Uuid) {
        if let Some(step) = self.steps.get(&id) {
            let entry = JournalEntry {
                record: RecordRef::Step {
                    execution_id: step.execution_id,
                    step_ref_id: step.step_ref_id.clone(),
                },
                status: step.status,
            };
            self.journal.push(entry);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All accepted writes, oldest first
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.read().await.journal.clone()
    }

    /// Journal position of the first time `step_ref_id` reached `status`
    pub async fn step_transition_index(
        &self,
        execution_id: Uuid,
        step_ref_id: &str,
        status: RunStatus,
    ) -> Option<usize> {
        self.state.read().await.journal.iter().position(|entry| {
            entry.status == status
                && matches!(
                    &entry.record,
                    RecordRef::Step { execution_id: e, step_ref_id: s }
                        if *e == execution_id && s == step_ref_id
                )
        })
    }

    pub async fn execution_step(&self, step_exec_id: Uuid) -> Option<ExecutionStepRecord> {
        self.state.read().await.steps.get(&step_exec_id).cloned()
    }

    /// Execution-step record for a step id within a run
    pub async fn find_execution_step(
        &self,
        execution_id: Uuid,
        step_ref_id: &str,
    ) -> Option<ExecutionStepRecord> {
        let state = self.state.read().await;
        state
            .steps_by_execution
            .get(&execution_id)?
            .iter()
            .filter_map(|id| state.steps.get(id))
            .find(|record| record.step_ref_id == step_ref_id)
            .cloned()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(
        &self,
        execution_id: Uuid,
        test_id: Option<&str>,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.executions.contains_key(&execution_id) {
            return Err(StoreError::AlreadyExists {
                kind: "execution",
                id: execution_id,
            });
        }

        state.executions.insert(
            execution_id,
            ExecutionRecord {
                id: execution_id,
                test_id: test_id.map(String::from),
                status,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        state.journal.push(JournalEntry {
            record: RecordRef::Execution(execution_id),
            status,
        });
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            })?;

        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: execution_id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if status.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        state.journal.push(JournalEntry {
            record: RecordRef::Execution(execution_id),
            status,
        });
        Ok(())
    }

    async fn create_execution_step(
        &self,
        step_exec_id: Uuid,
        execution_id: Uuid,
        step_ref_id: &str,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.executions.contains_key(&execution_id) {
            return Err(StoreError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            });
        }
        if state.steps.contains_key(&step_exec_id) {
            return Err(StoreError::AlreadyExists {
                kind: "execution step",
                id: step_exec_id,
            });
        }

        state.steps.insert(
            step_exec_id,
            ExecutionStepRecord {
                id: step_exec_id,
                execution_id,
                step_ref_id: step_ref_id.to_string(),
                status,
                attempts: 0,
                result_json: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        state
            .steps_by_execution
            .entry(execution_id)
            .or_default()
            .push(step_exec_id);
        state.journal_step(step_exec_id);
        Ok(())
    }

    async fn mark_execution_step_running(&self, step_exec_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state.step_mut(step_exec_id)?;
        if !record.status.can_transition_to(RunStatus::Running) {
            return Err(StoreError::InvalidTransition {
                id: step_exec_id,
                from: record.status,
                to: RunStatus::Running,
            });
        }

        record.status = RunStatus::Running;
        record.started_at = Utc::now();
        state.journal_step(step_exec_id);
        Ok(())
    }

    async fn update_execution_step_result(
        &self,
        step_exec_id: Uuid,
        status: RunStatus,
        result_json: &str,
        attempts: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state.step_mut(step_exec_id)?;
        if !status.is_terminal() || !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: step_exec_id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.attempts = attempts;
        record.result_json = Some(result_json.to_string());
        record.finished_at = Some(Utc::now());
        state.journal_step(step_exec_id);
        Ok(())
    }

    async fn failed_step_exec_ids(&self, execution_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .steps_by_execution
            .get(&execution_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        state
                            .steps
                            .get(*id)
                            .map(|s| s.status == RunStatus::Failed)
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn execution_steps(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionStepRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .steps_by_execution
            .get(&execution_id)
            .map(|ids| ids.iter().filter_map(|id| state.steps.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn execution(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.state.read().await.executions.get(&execution_id).cloned())
    }
}

/// Step catalog used to rebuild plans for reruns
#[derive(Debug)]
pub struct MemoryStepSource {
    store: Arc<MemoryStore>,
    steps: RwLock<Vec<Step>>,
}

impl MemoryStepSource {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            steps: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace step definitions, keyed by step id
    pub async fn add_steps(&self, steps: impl IntoIterator<Item = Step>) {
        let mut catalog = self.steps.write().await;
        for step in steps {
            match catalog.iter_mut().find(|s| s.id == step.id) {
                Some(existing) => *existing = step,
                None => catalog.push(step),
            }
        }
    }

    pub async fn add_plan(&self, plan: &Plan) {
        self.add_steps(plan.steps().iter().cloned()).await;
    }
}

#[async_trait]
impl StepSource for MemoryStepSource {
    async fn find_step_by_execution_step_id(
        &self,
        execution_step_id: Uuid,
    ) -> Result<Step, StoreError> {
        let record = self
            .store
            .execution_step(execution_step_id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                kind: "execution step",
                id: execution_step_id.to_string(),
            })?;

        self.steps
            .read()
            .await
            .iter()
            .find(|s| s.id == record.step_ref_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "step",
                id: record.step_ref_id,
            })
    }

    async fn find_direct_dependents(&self, step_ids: &[String]) -> Result<Vec<Step>, StoreError> {
        Ok(self
            .steps
            .read()
            .await
            .iter()
            .filter(|s| {
                s.depends_on
                    .as_ref()
                    .map(|dep| step_ids.contains(dep))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
