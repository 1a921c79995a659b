//! Trivial executors used for smoke plans and tests

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::registry::StepExecutor;
use crate::engine::result::StepResult;
use crate::plan::Parameters;

/// Always succeeds with `{"ok": true}`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl StepExecutor for NoopExecutor {
    async fn execute(&self, _: &str, _: &Parameters) -> anyhow::Result<StepResult> {
        let mut output = HashMap::new();
        output.insert("ok".to_string(), Value::Bool(true));
        Ok(StepResult::success(output))
    }
}

/// Always fails with the `message` parameter
#[derive(Debug, Clone, Copy, Default)]
pub struct FailExecutor;

#[async_trait]
impl StepExecutor for FailExecutor {
    async fn execute(&self, _: &str, parameters: &Parameters) -> anyhow::Result<StepResult> {
        let message = parameters
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("step failed");
        Ok(StepResult::failure(message))
    }
}

/// Sleeps for `duration_ms` milliseconds, then succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepExecutor;

#[async_trait]
impl StepExecutor for SleepExecutor {
    async fn execute(&self, _: &str, parameters: &Parameters) -> anyhow::Result<StepResult> {
        let duration_ms = match parameters.get("duration_ms") {
            None => 0,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| anyhow::anyhow!("duration_ms must be a non-negative integer"))?,
        };

        tokio::time::sleep(Duration::from_millis(duration_ms)).await;

        let mut output = HashMap::new();
        output.insert("slept_ms".to_string(), Value::from(duration_ms));
        Ok(StepResult::success(output))
    }
}
