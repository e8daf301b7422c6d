//! Weft Resolver
//!
//! Two small evaluators used by the orchestrator before a step runs:
//!
//! - [`resolve_value`] / [`resolve_inputs`] replace `${context.<path>}`
//!   references with values from the execution context.
//! - [`evaluate_condition`] turns a [`weft_config::StepCondition`] into a
//!   boolean.
//!
//! # Reference grammar
//!
//! ```text
//! reference := "${context." path "}"
//! path      := segment ( "." segment )*
//! ```
//!
//! A reference must span the whole string; it resolves to the stored value
//! with its type intact (`"${context.count}"` yields the number `5`, not the
//! string `"5"`). Strings that merely contain a reference, or use `${...}`
//! with another root, are left untouched.
//!
//! The path is first looked up as a single key (`"fetch.output"`). If that
//! key is absent, the longest stored key that prefixes the path is used and
//! the remaining segments walk into object fields or array indices, so
//! `${context.fetch.output.rows.0}` reads the first row of `fetch.output`.

mod condition;
mod error;
mod reference;

pub use condition::{ConditionOperator, evaluate_condition};
pub use error::{ConditionError, ResolveError};
pub use reference::{ReferenceSource, parse_reference, resolve_inputs, resolve_value};
