//! The six execution patterns.
//!
//! Every pattern runs against a [`Scope`]: one execution plus the step
//! executor. Step outcomes are logged to the execution log and successful
//! results are stored in the context under `<step_id>.output`.

mod conditional;
mod iteration;
mod map_reduce;
mod parallel;
mod saga;
mod sequential;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weft_config::WorkflowStepDef;
use weft_resolver::evaluate_condition;
use weft_tool::ToolInputs;
use weft_workflow::{ExecutionLogEntry, StepStatus, WorkflowExecution};

use crate::error::OrchestratorError;
use crate::executor::StepExecutor;

pub(crate) use sequential::Absorb;

#[derive(Clone)]
pub(crate) struct Scope {
  pub(crate) executor: Arc<StepExecutor>,
  pub(crate) execution: Arc<WorkflowExecution>,
  pub(crate) map_concurrency: Option<usize>,
}

impl Scope {
  pub(crate) fn new(
    executor: Arc<StepExecutor>,
    execution: Arc<WorkflowExecution>,
    map_concurrency: Option<usize>,
  ) -> Self {
    Self {
      executor,
      execution,
      map_concurrency,
    }
  }

  fn record(&self, entry: ExecutionLogEntry) {
    self.execution.record(entry);
  }

  /// Fail on cancellation, otherwise wait out a pause.
  pub(crate) async fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
    if cancel.is_cancelled() {
      return Err(OrchestratorError::Cancelled);
    }
    self.execution.wait_while_paused(cancel).await?;
    Ok(())
  }

  /// Why `step` must not run yet, if anything: an unmet (or unevaluable)
  /// pre-condition or a dependency without a completed log entry.
  fn skip_reason(&self, step: &WorkflowStepDef) -> Option<String> {
    for condition in &step.conditions {
      match evaluate_condition(condition, self.execution.context()) {
        Ok(true) => {}
        Ok(false) => {
          return Some(format!(
            "condition not met: {} {} {}",
            condition.left, condition.operator, condition.right
          ));
        }
        Err(e) => return Some(format!("condition could not be evaluated: {}", e)),
      }
    }

    step
      .depends_on
      .iter()
      .find(|dependency| !self.execution.log().has_completed(dependency))
      .map(|dependency| format!("dependency '{}' has not completed", dependency))
  }

  fn record_skipped(&self, step: &WorkflowStepDef, reason: &str) {
    info!(
      execution_id = %self.execution.id(),
      step_id = %step.id,
      reason,
      "step_skipped"
    );
    self.record(
      ExecutionLogEntry::info(format!("Step skipped: {}", reason))
        .for_step(&step.id)
        .with_status(StepStatus::Skipped),
    );
  }

  fn record_step_error(&self, step_id: &str, err: &OrchestratorError) {
    warn!(
      execution_id = %self.execution.id(),
      step_id,
      error = %err,
      "step_failed"
    );
    self.record(
      ExecutionLogEntry::error(format!("Step error: {}", err))
        .for_step(step_id)
        .with_status(StepStatus::Error)
        .with_data(json!({ "error": err.to_string() })),
    );
  }

  /// Execute one step, store its output and log the outcome either way.
  pub(crate) async fn run_step(
    &self,
    step: &WorkflowStepDef,
    extra: Option<ToolInputs>,
    cancel: &CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    self.record_started(step);
    let outcome = self
      .executor
      .execute(&self.execution, step, extra, cancel)
      .await;
    self.finish_step(step, outcome)
  }

  /// Like [`Scope::run_step`] for a saga compensation, which keeps running
  /// after the execution is cancelled.
  pub(crate) async fn run_compensation(
    &self,
    step: &WorkflowStepDef,
  ) -> Result<Value, OrchestratorError> {
    self.record_started(step);
    let outcome = self.executor.compensate(&self.execution, step).await;
    self.finish_step(step, outcome)
  }

  fn record_started(&self, step: &WorkflowStepDef) {
    info!(
      execution_id = %self.execution.id(),
      step_id = %step.id,
      tool = %step.tool,
      "step_started"
    );
  }

  fn finish_step(
    &self,
    step: &WorkflowStepDef,
    outcome: Result<Value, OrchestratorError>,
  ) -> Result<Value, OrchestratorError> {
    let stored = outcome.and_then(|value| {
      self
        .execution
        .context()
        .set(format!("{}.output", step.id), value.clone())
        .map(|_| value)
        .map_err(OrchestratorError::from)
    });

    match stored {
      Ok(value) => {
        info!(
          execution_id = %self.execution.id(),
          step_id = %step.id,
          "step_completed"
        );
        self.record(
          ExecutionLogEntry::info("Step completed")
            .for_step(&step.id)
            .with_status(StepStatus::Completed)
            .with_data(json!({ "result": value })),
        );
        Ok(value)
      }
      Err(e) => {
        self.record_step_error(&step.id, &e);
        Err(e)
      }
    }
  }
}
