//! Single-step execution with retry
//!
//! Resolves the step's executor, runs it, and retries unsuccessful attempts
//! up to `max_attempts` with a fixed `retry_delay` between them. Executor
//! errors and panics become failed results. Cancellation interrupts both the
//! retry sleep and the in-flight executor future.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::StepExecutorRegistry;
use super::result::StepResult;
use crate::plan::Step;

pub const CANCELLED_MESSAGE: &str = "step cancelled";

/// Run `step` until it succeeds or runs out of attempts
///
/// Returns the final result and the number of attempts actually started.
pub async fn execute_step(
    registry: &StepExecutorRegistry,
    step: &Step,
    cancel: &CancellationToken,
) -> (StepResult, u32) {
    let max_attempts = step.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return (StepResult::failure(CANCELLED_MESSAGE), attempts);
        }

        attempts += 1;
        debug!(step_id = %step.id, attempt = attempts, max_attempts, "Executing step");

        let result = tokio::select! {
            _ = cancel.cancelled() => return (StepResult::failure(CANCELLED_MESSAGE), attempts),
            result = attempt(registry, step) => result,
        };

        if result.success || attempts >= max_attempts {
            return (result, attempts);
        }

        warn!(
            step_id = %step.id,
            attempt = attempts,
            max_attempts,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Step attempt failed, retrying in {:?}",
            step.retry_delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return (StepResult::failure(CANCELLED_MESSAGE), attempts),
            _ = tokio::time::sleep(step.retry_delay) => {}
        }
    }
}

async fn attempt(registry: &StepExecutorRegistry, step: &Step) -> StepResult {
    let Some(executor) = registry.get(&step.executor_name) else {
        return StepResult::failure(format!(
            "no executor registered for '{}'",
            step.executor_name
        ));
    };

    let call = executor.execute(&step.step_definition_id, &step.parameters);
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => StepResult::failure(format!("{:#}", e)),
        Err(panic) => StepResult::failure(format!("executor panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
