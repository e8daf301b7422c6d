//! Weft Tool
//!
//! The boundary between the orchestrator and the operations it calls. The
//! orchestrator knows nothing about what a tool does: it looks one up by name
//! in a [`ToolRegistry`] and calls [`Tool::invoke`] with resolved inputs and a
//! cancellation token.

mod builtin;
mod error;
mod registry;
mod tool;

pub use builtin::{EchoTool, FailTool, SleepTool, SumTool, builtin_registry};
pub use error::ToolError;
pub use registry::{InMemoryToolRegistry, ToolRegistry};
pub use tool::{FnTool, Tool, ToolInputs};
