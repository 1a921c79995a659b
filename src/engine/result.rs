//! Execution result types

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of an execution or execution-step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    /// Whether a record may move from `self` to `next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Queued => next != RunStatus::Queued,
            RunStatus::Running => next.is_terminal(),
            RunStatus::Success | RunStatus::Failed => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub output: Option<HashMap<String, Value>>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(output: HashMap<String, Value>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Persisted shape: both keys always present, one of them usually null
    pub fn to_result_json(&self) -> String {
        serde_json::json!({
            "output": self.output,
            "error": self.error,
        })
        .to_string()
    }
}

/// Result of one plan execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: RunStatus,
    /// Outcomes keyed by step id, for every step that was dispatched
    pub step_results: HashMap<String, StepResult>,
    pub cancelled: bool,
}

impl ExecutionResult {
    /// Stand-in returned by queues that cannot observe the real run
    pub fn placeholder(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            status: RunStatus::Queued,
            step_results: HashMap::new(),
            cancelled: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .step_results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(id, _)| id.as_str())
            .collect();
        failed.sort();
        failed
    }
}
