//! Weft Workflow
//!
//! Runtime state owned by a single workflow execution:
//!
//! - [`WorkflowContext`]: concurrency-safe key/value store plus the ordered
//!   list of [`Finding`]s. The only mutable state shared between steps that
//!   run concurrently.
//! - [`ExecutionLog`]: append-only audit trail of step lifecycle events.
//! - [`WorkflowExecution`]: one run of a definition, with its lifecycle
//!   state machine (`Created -> Running <-> Paused -> Completed | Failed |
//!   Cancelled`).
//!
//! Once an execution reaches a terminal state its context and log are sealed
//! and reject further writes. A [`SealHold`] postpones the seal until
//! in-flight compensation has been recorded.

mod context;
mod error;
mod execution;
mod finding;
mod log;

pub use context::WorkflowContext;
pub use error::ExecutionError;
pub use execution::{ExecutionSnapshot, ExecutionState, SealHold, WorkflowExecution};
pub use finding::{Finding, FindingSeverity, FindingType};
pub use log::{ExecutionLog, ExecutionLogEntry, LogLevel, StepStatus};
