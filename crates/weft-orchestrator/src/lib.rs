//! Workflow orchestration for weft.
//!
//! The [`Orchestrator`] owns executions and runs steps against them using
//! six patterns: sequential, parallel, conditional, loop, map-reduce and
//! saga. Single steps go through the [`StepExecutor`], which resolves
//! `${context.<path>}` inputs, looks the tool up and invokes it under a
//! deadline.

mod config;
mod error;
mod executor;
mod orchestrator;
mod patterns;
mod pool;
mod retry;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use executor::StepExecutor;
pub use orchestrator::Orchestrator;
pub use pool::WorkerPool;
pub use retry::{backoff_delay, retry_with_backoff};
