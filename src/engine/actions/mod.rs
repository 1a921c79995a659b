//! Built-in step executors
//!
//! - `builtin` - `noop`, `fail` and `sleep`
//! - `http` - `http-request` via reqwest

pub mod builtin;
pub mod http;

pub use builtin::{FailExecutor, NoopExecutor, SleepExecutor};
pub use http::HttpRequestExecutor;
