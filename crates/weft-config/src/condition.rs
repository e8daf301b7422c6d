use serde::{Deserialize, Serialize};

/// A `left <operator> right` comparison.
///
/// Either operand may be a literal or a `${context.<path>}` reference. The
/// operator is kept as free text so an unknown operator surfaces as an
/// evaluation error rather than a parse failure of the whole definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCondition {
  pub left: serde_json::Value,
  pub operator: String,
  #[serde(default)]
  pub right: serde_json::Value,
}

impl StepCondition {
  pub fn new(
    left: impl Into<serde_json::Value>,
    operator: impl Into<String>,
    right: impl Into<serde_json::Value>,
  ) -> Self {
    Self {
      left: left.into(),
      operator: operator.into(),
      right: right.into(),
    }
  }
}

/// Controls the Loop pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
  /// Hard cap on the number of iterations. Must be at least 1.
  pub max_iterations: u32,
  /// Checked before every iteration; the loop stops once it holds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exit_condition: Option<StepCondition>,
  /// Pause between iterations.
  #[serde(default)]
  pub delay_between_ms: u64,
  /// Log a failed iteration and keep going instead of aborting.
  #[serde(default)]
  pub continue_on_error: bool,
}

impl LoopConfig {
  pub fn with_max_iterations(max_iterations: u32) -> Self {
    Self {
      max_iterations,
      exit_condition: None,
      delay_between_ms: 0,
      continue_on_error: false,
    }
  }
}
