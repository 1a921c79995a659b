//! Persistence gateway
//!
//! The engine never talks to a database directly. It persists execution and
//! execution-step records through `ExecutionStore`, and the rerun resolver
//! reads step definitions through `StepSource`. `memory` provides in-process
//! implementations of both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use crate::engine::RunStatus;
use crate::plan::Step;

pub mod memory;

pub use memory::{JournalEntry, MemoryStepSource, MemoryStore, RecordRef};

/// Ids per dependent-step lookup when walking the depends-on index
pub const DEPENDENT_LOOKUP_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: Uuid },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub test_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persisted state of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStepRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_ref_id: String,
    pub status: RunStatus,
    pub attempts: u32,
    pub result_json: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(
        &self,
        execution_id: Uuid,
        test_id: Option<&str>,
        status: RunStatus,
    ) -> Result<(), StoreError>;

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: RunStatus,
    ) -> Result<(), StoreError>;

    async fn create_execution_step(
        &self,
        step_exec_id: Uuid,
        execution_id: Uuid,
        step_ref_id: &str,
        status: RunStatus,
    ) -> Result<(), StoreError>;

    async fn mark_execution_step_running(&self, step_exec_id: Uuid) -> Result<(), StoreError>;

    async fn update_execution_step_result(
        &self,
        step_exec_id: Uuid,
        status: RunStatus,
        result_json: &str,
        attempts: u32,
    ) -> Result<(), StoreError>;

    async fn failed_step_exec_ids(&self, execution_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    async fn execution_steps(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionStepRecord>, StoreError>;

    async fn execution(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;
}

/// Source of step definitions for rebuilding plans
#[async_trait]
pub trait StepSource: Send + Sync {
    /// Step that produced the given execution-step record
    async fn find_step_by_execution_step_id(
        &self,
        execution_step_id: Uuid,
    ) -> Result<Step, StoreError>;

    /// Steps whose `depends_on` is one of `step_ids`
    async fn find_direct_dependents(&self, step_ids: &[String]) -> Result<Vec<Step>, StoreError>;

    /// Every step transitively gated on `start_step_ids`, in discovery order
    ///
    /// Breadth-first over the depends-on index, querying at most
    /// `DEPENDENT_LOOKUP_BATCH` ids at a time. Start ids are never returned.
    async fn find_dependent_steps_recursively(
        &self,
        start_step_ids: &[String],
    ) -> Result<Vec<Step>, StoreError> {
        let mut found = Vec::new();
        let mut seen: HashSet<String> = start_step_ids.iter().cloned().collect();
        let mut queue: VecDeque<String> = start_step_ids.iter().cloned().collect();

        while !queue.is_empty() {
            let take = queue.len().min(DEPENDENT_LOOKUP_BATCH);
            let batch: Vec<String> = queue.drain(..take).collect();

            for step in self.find_direct_dependents(&batch).await? {
                if seen.insert(step.id.clone()) {
                    queue.push_back(step.id.clone());
                    found.push(step);
                }
            }
        }

        Ok(found)
    }
}
