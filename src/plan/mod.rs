//! Plan types and definitions
//!
//! - `step` - Step and its retry policy
//! - `definition` - Validated Plan with eager cycle detection
//! - `loader` - Load plans from YAML/JSON files
//! - `engine_config` - Engine configuration (pool size, failure policy, queue)

pub mod definition;
pub mod engine_config;
pub mod loader;
pub mod step;

pub use definition::{Plan, PlanError, PlanSpec};
pub use engine_config::{EngineConfig, FailurePolicy, QueueConfig};
pub use loader::{LoadError, PlanLoader};
pub use step::{Parameters, Step};
