use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_config::{LoopConfig, WorkflowStepDef};
use weft_resolver::evaluate_condition;
use weft_workflow::ExecutionLogEntry;

use super::Scope;
use crate::error::OrchestratorError;

impl Scope {
  /// Repeat `steps` under `config`. Returns the number of iterations run.
  ///
  /// The exit condition is checked at the start of each iteration. Each
  /// iteration records its index under `loop.iteration_<i>.index`. The
  /// delay is skipped after the last iteration and stops early on
  /// cancellation.
  pub(crate) async fn repeat(
    &self,
    steps: &[WorkflowStepDef],
    config: &LoopConfig,
    cancel: &CancellationToken,
  ) -> Result<u32, OrchestratorError> {
    if config.max_iterations == 0 {
      return Err(OrchestratorError::invalid_config(
        "loop max_iterations must be greater than zero",
      ));
    }

    let mut completed = 0;
    let mut exited = false;

    for iteration in 0..config.max_iterations {
      self.checkpoint(cancel).await?;

      if let Some(exit) = &config.exit_condition {
        if evaluate_condition(exit, self.execution.context())? {
          exited = true;
          break;
        }
      }

      self
        .execution
        .context()
        .set(format!("loop.iteration_{}.index", iteration), json!(iteration))?;
      debug!(execution_id = %self.execution.id(), iteration, "loop_iteration_started");

      if let Err(e) = self.sequential(steps, cancel).await {
        if !config.continue_on_error || e.is_cancellation() {
          return Err(OrchestratorError::LoopIteration {
            iteration,
            source: Box::new(e),
          });
        }
        warn!(
          execution_id = %self.execution.id(),
          iteration,
          error = %e,
          "loop_iteration_failed"
        );
        self.record(
          ExecutionLogEntry::error(format!("Loop iteration {} failed, continuing", iteration))
            .with_data(json!({ "iteration": iteration, "error": e.to_string() })),
        );
      }

      completed += 1;

      if config.delay_between_ms > 0 && iteration + 1 < config.max_iterations {
        tokio::select! {
          _ = tokio::time::sleep(Duration::from_millis(config.delay_between_ms)) => {}
          _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
          _ = self.execution.cancellation().cancelled() => return Err(OrchestratorError::Cancelled),
        }
      }
    }

    self.record(ExecutionLogEntry::info(format!(
      "Loop completed after {} iterations ({})",
      completed,
      if exited {
        "exit condition met"
      } else {
        "max reached"
      }
    )));
    Ok(completed)
  }
}
