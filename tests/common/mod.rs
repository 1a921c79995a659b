#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use step_engine::engine::ExecutionEngine;
use step_engine::plan::{EngineConfig, Parameters, Plan};
use step_engine::queue::{JobHandle, JobQueue, QueueError};
use step_engine::store::{ExecutionRecord, ExecutionStepRecord, ExecutionStore, StoreError};
use step_engine::{ExecutionResult, MemoryStore, RunStatus, StepExecutor, StepExecutorRegistry, StepResult};
use tempfile::TempDir;
use uuid::Uuid;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write file");
    path
}

pub fn two_step_plan_yaml() -> &'static str {
    r#"
test_id: checkout-flow
steps:
  - id: s1
    executor_name: noop
  - id: s2
    executor_name: noop
    depends_on: s1
"#
}

pub fn engine(store: Arc<dyn ExecutionStore>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(StepExecutorRegistry::with_builtins()), store, config)
}

pub fn engine_with_registry(
    registry: StepExecutorRegistry,
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(registry), store, config)
}

pub fn param_u64(parameters: &Parameters, key: &str) -> u64 {
    parameters.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    End(String),
}

/// Records start/end of every call, sleeps `delay_ms` and fails when `fail` is true
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(
        &self,
        step_definition_id: &str,
        parameters: &Parameters,
    ) -> anyhow::Result<StepResult> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Start(step_definition_id.to_string()));

        tokio::time::sleep(Duration::from_millis(param_u64(parameters, "delay_ms"))).await;

        self.events
            .lock()
            .unwrap()
            .push(Event::End(step_definition_id.to_string()));

        if parameters.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            Ok(StepResult::failure("requested failure"))
        } else {
            Ok(StepResult::success(Default::default()))
        }
    }
}

/// Tracks the highest number of overlapping calls
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for ConcurrencyGauge {
    async fn execute(&self, _: &str, _: &Parameters) -> anyhow::Result<StepResult> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(StepResult::success(Default::default()))
    }
}

/// `MemoryStore` that rejects step result writes
#[derive(Debug, Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl ExecutionStore for FailingStore {
    async fn create_execution(
        &self,
        execution_id: Uuid,
        test_id: Option<&str>,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        self.inner.create_execution(execution_id, test_id, status).await
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        self.inner.update_execution_status(execution_id, status).await
    }

    async fn create_execution_step(
        &self,
        step_exec_id: Uuid,
        execution_id: Uuid,
        step_ref_id: &str,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        self.inner
            .create_execution_step(step_exec_id, execution_id, step_ref_id, status)
            .await
    }

    async fn mark_execution_step_running(&self, step_exec_id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_execution_step_running(step_exec_id).await
    }

    async fn update_execution_step_result(
        &self,
        _: Uuid,
        _: RunStatus,
        _: &str,
        _: u32,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database is read-only".to_string()))
    }

    async fn failed_step_exec_ids(&self, execution_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.inner.failed_step_exec_ids(execution_id).await
    }

    async fn execution_steps(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<ExecutionStepRecord>, StoreError> {
        self.inner.execution_steps(execution_id).await
    }

    async fn execution(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        self.inner.execution(execution_id).await
    }
}

/// Job queue that keeps submitted plans instead of running them
#[derive(Debug, Clone, Default)]
pub struct CapturingQueue {
    pub plans: Arc<Mutex<Vec<Plan>>>,
}

impl CapturingQueue {
    pub fn plans(&self) -> Vec<Plan> {
        self.plans.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for CapturingQueue {
    async fn submit(&self, plan: Plan) -> Result<JobHandle, QueueError> {
        let execution_id = plan.execution_id();
        self.plans.lock().unwrap().push(plan);
        Ok(JobHandle::Detached(ExecutionResult::placeholder(execution_id)))
    }
}
