//! Built-in tools available to the CLI.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ToolError;
use crate::registry::InMemoryToolRegistry;
use crate::tool::{Tool, ToolInputs};

/// Returns its inputs unchanged.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
  fn name(&self) -> &str {
    "echo"
  }

  fn description(&self) -> &str {
    "Return the inputs as an object"
  }

  async fn invoke(&self, inputs: ToolInputs, _cancel: CancellationToken) -> Result<Value, ToolError> {
    Ok(Value::Object(inputs))
  }
}

/// Sums the numbers in `values`, or in `map_results` when used as a reduce
/// step. Nulls are skipped; the result is an integer when every addend is.
pub struct SumTool;

#[async_trait]
impl Tool for SumTool {
  fn name(&self) -> &str {
    "sum"
  }

  fn description(&self) -> &str {
    "Sum an array of numbers from `values` or `map_results`"
  }

  async fn invoke(&self, inputs: ToolInputs, _cancel: CancellationToken) -> Result<Value, ToolError> {
    let (input, values) = ["values", "map_results"]
      .iter()
      .find_map(|key| inputs.get(*key).map(|v| (*key, v)))
      .ok_or_else(|| ToolError::invalid_input("values", "missing"))?;

    let items = values
      .as_array()
      .ok_or_else(|| ToolError::invalid_input(input, "expected an array"))?;

    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut all_integers = true;

    for item in items.iter().filter(|v| !v.is_null()) {
      match item.as_i64() {
        Some(n) if all_integers => {
          int_total = int_total
            .checked_add(n)
            .ok_or_else(|| ToolError::failed("integer overflow"))?;
          float_total += n as f64;
        }
        _ => {
          let n = item
            .as_f64()
            .ok_or_else(|| ToolError::invalid_input(input, format!("not a number: {}", item)))?;
          all_integers = false;
          float_total += n;
        }
      }
    }

    if all_integers {
      Ok(json!(int_total))
    } else {
      Ok(json!(float_total))
    }
  }
}

/// Waits `ms` milliseconds, stopping early on cancellation.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
  fn name(&self) -> &str {
    "sleep"
  }

  fn description(&self) -> &str {
    "Wait for `ms` milliseconds"
  }

  async fn invoke(&self, inputs: ToolInputs, cancel: CancellationToken) -> Result<Value, ToolError> {
    let ms = inputs
      .get("ms")
      .and_then(Value::as_u64)
      .ok_or_else(|| ToolError::invalid_input("ms", "expected a non-negative integer"))?;

    debug!(ms, "sleep tool waiting");

    tokio::select! {
      _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept_ms": ms })),
      _ = cancel.cancelled() => Err(ToolError::Cancelled),
    }
  }
}

/// Always fails with `message`.
pub struct FailTool;

#[async_trait]
impl Tool for FailTool {
  fn name(&self) -> &str {
    "fail"
  }

  fn description(&self) -> &str {
    "Fail with the given `message`"
  }

  async fn invoke(&self, inputs: ToolInputs, _cancel: CancellationToken) -> Result<Value, ToolError> {
    let message = inputs
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or("tool failed on request");
    Err(ToolError::failed(message))
  }
}

/// Registry pre-populated with every built-in tool.
pub fn builtin_registry() -> InMemoryToolRegistry {
  InMemoryToolRegistry::new()
    .with(EchoTool)
    .with(SumTool)
    .with(SleepTool)
    .with(FailTool)
}
