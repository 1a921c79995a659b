//! Engine configuration
//!
//! Loaded from an `engine.yaml` file:
//!
//! ```yaml
//! max_concurrent_steps: 8
//! poll_interval_ms: 250
//! failure_policy: respect_blocking
//!
//! queue:
//!   type: broker
//!   capacity: 64
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::loader::LoadError;

/// How the scheduler reacts to a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed step aborts the run
    #[default]
    AbortOnFailure,
    /// Only failures of steps marked `blocking` abort the run
    RespectBlocking,
}

/// Which job queue strategy to build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueConfig {
    /// Single in-process worker with real completion handles
    #[default]
    Memory,
    /// Serialized plans pushed onto a broker list, drained by a worker
    Broker {
        #[serde(default = "default_broker_capacity")]
        capacity: usize,
    },
}

fn default_broker_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the step pool shared by all running plans
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Upper bound on how long the scheduler waits before re-scanning
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_max_concurrent_steps() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: default_max_concurrent_steps(),
            poll_interval_ms: default_poll_interval_ms(),
            failure_policy: FailurePolicy::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| LoadError::Yaml {
                file: path.display().to_string(),
                error: e,
            })?;
        Ok(config)
    }
}
