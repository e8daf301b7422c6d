use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use weft_config::{StepCondition, WorkflowStepDef};
use weft_resolver::evaluate_condition;
use weft_workflow::{ExecutionLogEntry, StepStatus};

use super::Scope;
use crate::error::OrchestratorError;

impl Scope {
  /// Evaluate `condition` and run the matching branch sequentially. The
  /// decision is logged before the branch starts. Returns the decision.
  pub(crate) async fn conditional(
    &self,
    condition: &StepCondition,
    if_true: &[WorkflowStepDef],
    if_false: &[WorkflowStepDef],
    cancel: &CancellationToken,
  ) -> Result<bool, OrchestratorError> {
    let met = match evaluate_condition(condition, self.execution.context()) {
      Ok(met) => met,
      Err(source) => {
        self.record(
          ExecutionLogEntry::error(format!("Condition evaluation failed: {}", source))
            .with_status(StepStatus::Decision),
        );
        return Err(source.into());
      }
    };

    let (branch, label) = if met {
      (if_true, "true")
    } else {
      (if_false, "false")
    };

    info!(
      execution_id = %self.execution.id(),
      operator = %condition.operator,
      branch = label,
      "branch_selected"
    );
    self.record(
      ExecutionLogEntry::info(format!(
        "Condition {}, executing {} branch",
        if met { "met" } else { "not met" },
        label
      ))
      .with_status(StepStatus::Decision)
      .with_data(json!({
        "operator": condition.operator,
        "result": met,
        "steps": branch.len(),
      })),
    );

    self.sequential(branch, cancel).await?;
    Ok(met)
  }
}
