use serde::{Deserialize, Serialize};

use crate::condition::StepCondition;
use crate::policy::{OnError, RetryPolicy, StepErrorHandling};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
  #[default]
  Simple,
  Parallel,
  Conditional,
  Loop,
  SubWorkflow,
}

/// A single step: one tool invocation plus the rules around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepDef {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub step_type: StepType,
  #[serde(default)]
  pub tool: String,
  /// Literal values and `${context.<path>}` references, nested freely.
  #[serde(default)]
  pub inputs: serde_json::Map<String, serde_json::Value>,
  /// All must hold for the step to run.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conditions: Vec<StepCondition>,
  #[serde(default)]
  pub error_handling: StepErrorHandling,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Steps that must have a "completed" log entry before this one runs.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  #[serde(default)]
  pub continue_on_fail: bool,
}

impl WorkflowStepDef {
  /// Create a simple step invoking `tool`.
  pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      step_type: StepType::Simple,
      tool: tool.into(),
      inputs: serde_json::Map::new(),
      conditions: Vec::new(),
      error_handling: StepErrorHandling::default(),
      retry: RetryPolicy::default(),
      timeout_ms: None,
      depends_on: Vec::new(),
      continue_on_fail: false,
    }
  }

  pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.inputs.insert(key.into(), value.into());
    self
  }

  pub fn with_condition(mut self, condition: StepCondition) -> Self {
    self.conditions.push(condition);
    self
  }

  pub fn with_dependency(mut self, step_id: impl Into<String>) -> Self {
    self.depends_on.push(step_id.into());
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn continue_on_fail(mut self) -> Self {
    self.continue_on_fail = true;
    self
  }

  /// Whether a failure of this step is logged and absorbed rather than
  /// aborting the enclosing pattern.
  pub fn absorbs_failure(&self) -> bool {
    self.continue_on_fail || self.error_handling.on_error == OnError::Skip
  }

  /// Name used in log messages; falls back to the id.
  pub fn display_name(&self) -> &str {
    if self.name.is_empty() {
      &self.id
    } else {
      &self.name
    }
  }
}
