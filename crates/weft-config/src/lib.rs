//! Weft Config
//!
//! This crate contains the serializable workflow definition types for weft.
//! A [`WorkflowDefinition`] is an immutable template: it is loaded once
//! (typically from JSON), validated, and then shared by every execution
//! created from it.
//!
//! Step inputs and condition operands are plain JSON values. Strings of the
//! form `${context.<path>}` are symbolic references resolved against the
//! execution context at run time; see `weft-resolver`.

mod condition;
mod error;
mod io;
mod policy;
mod saga;
mod step;
mod workflow;

pub use condition::{LoopConfig, StepCondition};
pub use error::DefinitionError;
pub use io::{TriggerType, WorkflowInput, WorkflowOutput, WorkflowTrigger};
pub use policy::{ErrorHandlingPolicy, ErrorStrategy, OnError, RetryPolicy, StepErrorHandling};
pub use saga::SagaTransaction;
pub use step::{StepType, WorkflowStepDef};
pub use workflow::WorkflowDefinition;
