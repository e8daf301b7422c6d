use serde::{Deserialize, Serialize};

use crate::step::WorkflowStepDef;

/// One action of a saga and the step that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaTransaction {
  pub name: String,
  pub action: WorkflowStepDef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compensation: Option<WorkflowStepDef>,
}

impl SagaTransaction {
  pub fn new(name: impl Into<String>, action: WorkflowStepDef) -> Self {
    Self {
      name: name.into(),
      action,
      compensation: None,
    }
  }

  pub fn with_compensation(mut self, compensation: WorkflowStepDef) -> Self {
    self.compensation = Some(compensation);
    self
  }
}
