//! Step executor registry
//!
//! Maps executor names ("http-request", "db.runSql", ...) to the capability
//! that performs a step's side effect. The registry is owned and shared with
//! the engine through an `Arc`; registration and lookup may race freely and
//! the last registration for a name wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::actions::{FailExecutor, HttpRequestExecutor, NoopExecutor, SleepExecutor};
use super::result::StepResult;
use crate::plan::Parameters;

/// Performs the side effect of a step
///
/// Returning `Err` is treated like a failed attempt carrying the error's
/// message; it never stops the engine.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step_definition_id: &str,
        parameters: &Parameters,
    ) -> anyhow::Result<StepResult>;
}

/// Closures are called inline on the runtime thread driving the step, so
/// they must not block. Wrap blocking work in [`BlockingExecutor`] instead.
#[async_trait]
impl<F> StepExecutor for F
where
    F: Fn(&str, &Parameters) -> anyhow::Result<StepResult> + Send + Sync,
{
    async fn execute(
        &self,
        step_definition_id: &str,
        parameters: &Parameters,
    ) -> anyhow::Result<StepResult> {
        self(step_definition_id, parameters)
    }
}

/// Runs a synchronous executor on tokio's blocking thread pool
///
/// Use it for capabilities built on blocking clients. Cancelling the step
/// stops waiting for the call, but the call itself runs to completion on its
/// pool thread.
pub struct BlockingExecutor<F> {
    call: Arc<F>,
}

impl<F> BlockingExecutor<F>
where
    F: Fn(&str, &Parameters) -> anyhow::Result<StepResult> + Send + Sync + 'static,
{
    pub fn new(call: F) -> Self {
        Self {
            call: Arc::new(call),
        }
    }
}

#[async_trait]
impl<F> StepExecutor for BlockingExecutor<F>
where
    F: Fn(&str, &Parameters) -> anyhow::Result<StepResult> + Send + Sync + 'static,
{
    async fn execute(
        &self,
        step_definition_id: &str,
        parameters: &Parameters,
    ) -> anyhow::Result<StepResult> {
        let call = self.call.clone();
        let step_definition_id = step_definition_id.to_string();
        let parameters = parameters.clone();

        match tokio::task::spawn_blocking(move || call(&step_definition_id, &parameters)).await {
            Ok(result) => result,
            // Re-raised so the step runner reports it like any executor panic
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow::anyhow!("blocking executor did not finish: {}", e)),
        }
    }
}

impl<F> std::fmt::Debug for BlockingExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingExecutor").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct StepExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn StepExecutor>>>,
}

impl StepExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `noop`, `fail`, `sleep` and `http-request` installed
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("noop", NoopExecutor);
        registry.register("fail", FailExecutor);
        registry.register("sleep", SleepExecutor);
        registry.register("http-request", HttpRequestExecutor::new());
        registry
    }

    pub fn register<E>(&self, name: impl Into<String>, executor: E)
    where
        E: StepExecutor + 'static,
    {
        self.register_shared(name, Arc::new(executor));
    }

    /// Register a closure that blocks; it runs through [`BlockingExecutor`]
    pub fn register_blocking<F>(&self, name: impl Into<String>, call: F)
    where
        F: Fn(&str, &Parameters) -> anyhow::Result<StepResult> + Send + Sync + 'static,
    {
        self.register(name, BlockingExecutor::new(call));
    }

    pub fn register_shared(&self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        let name = name.into();
        tracing::debug!(executor = %name, "Registering step executor");
        self.executors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, executor);
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StepExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}
