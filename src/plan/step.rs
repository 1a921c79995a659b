//! Step definitions
//!
//! A `Step` is one unit of work in a run: an executor binding, its parameters,
//! an optional single predecessor and a retry policy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Parameters passed to a step executor
pub type Parameters = HashMap<String, Value>;

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the plan
    pub id: String,

    /// Reference to the reusable step definition
    #[serde(default)]
    pub step_definition_id: String,

    /// Name used to resolve the executor in the registry
    pub executor_name: String,

    /// Executor parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// Step that must complete (success or failure) before this one starts
    #[serde(default, alias = "depends_on_key")]
    pub depends_on: Option<String>,

    /// Whether a failure of this step halts the rest of the run
    #[serde(default = "default_blocking")]
    pub blocking: bool,

    /// Maximum number of attempts (at least 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(
        default = "default_retry_delay",
        rename = "retry_delay_ms",
        with = "duration_ms"
    )]
    pub retry_delay: Duration,
}

fn default_blocking() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

impl Step {
    /// Create a step with default policy (blocking, one attempt)
    pub fn new(id: impl Into<String>, executor_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            step_definition_id: id.clone(),
            id,
            executor_name: executor_name.into(),
            parameters: HashMap::new(),
            depends_on: None,
            blocking: default_blocking(),
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
        }
    }

    pub fn with_definition(mut self, step_definition_id: impl Into<String>) -> Self {
        self.step_definition_id = step_definition_id.into();
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on = Some(step_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_defaults_from_yaml() {
        let yaml = r#"
id: login
executor_name: http-request
parameters:
  url: "http://localhost:3000/login"
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.id, "login");
        assert!(step.blocking);
        assert_eq!(step.max_attempts, 1);
        assert_eq!(step.retry_delay, Duration::from_millis(1000));
        assert_eq!(step.depends_on, None);
        assert_eq!(
            step.parameters.get("url"),
            Some(&Value::String("http://localhost:3000/login".into()))
        );
    }

    #[test]
    fn test_step_retry_and_dependency() {
        let yaml = r#"
id: verify
executor_name: db.runSql
depends_on_key: login
blocking: false
max_attempts: 3
retry_delay_ms: 250
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.depends_on.as_deref(), Some("login"));
        assert!(!step.blocking);
        assert_eq!(step.max_attempts, 3);
        assert_eq!(step.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_builder() {
        let step = Step::new("s2", "noop")
            .depends_on("s1")
            .with_param("count", 2)
            .with_retry(4, Duration::from_millis(10))
            .non_blocking();

        assert_eq!(step.step_definition_id, "s2");
        assert_eq!(step.depends_on.as_deref(), Some("s1"));
        assert_eq!(step.parameters.get("count"), Some(&Value::from(2)));
        assert_eq!(step.max_attempts, 4);
        assert!(!step.blocking);
    }
}
