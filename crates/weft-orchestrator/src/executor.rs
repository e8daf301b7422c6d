//! Single-step execution: resolve, look up, invoke under a deadline.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use weft_config::WorkflowStepDef;
use weft_resolver::resolve_inputs;
use weft_tool::{Tool, ToolError, ToolInputs, ToolRegistry};
use weft_workflow::{ExecutionLogEntry, WorkflowExecution};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::retry::retry_with_backoff;

/// Executes one step against one execution's context.
///
/// Does not write the step's output anywhere; storing results and logging
/// step outcomes belongs to the calling pattern.
pub struct StepExecutor {
  registry: Arc<dyn ToolRegistry>,
  default_timeout: Duration,
  retry_base_delay: Duration,
}

impl StepExecutor {
  pub fn new(registry: Arc<dyn ToolRegistry>, config: &OrchestratorConfig) -> Self {
    Self {
      registry,
      default_timeout: config.default_step_timeout(),
      retry_base_delay: config.retry_base_delay(),
    }
  }

  pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
    &self.registry
  }

  /// Deadline for `step`: its own `timeout_ms`, or the default when unset
  /// or zero.
  pub fn timeout_for(&self, step: &WorkflowStepDef) -> Duration {
    match step.timeout_ms {
      Some(ms) if ms > 0 => Duration::from_millis(ms),
      _ => self.default_timeout,
    }
  }

  /// Execute `step` and return the tool's result.
  ///
  /// `extra` inputs are merged after reference resolution, so their values
  /// are passed through as data and never treated as references. Steps with
  /// a retry policy of more than one attempt retry tool failures and
  /// timeouts, recording a warning entry for each failed attempt.
  #[instrument(
    name = "step_execute",
    skip(self, execution, step, extra, cancel),
    fields(
      execution_id = %execution.id(),
      step_id = %step.id,
      tool = %step.tool,
    )
  )]
  pub async fn execute(
    &self,
    execution: &WorkflowExecution,
    step: &WorkflowStepDef,
    extra: Option<ToolInputs>,
    cancel: &CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    self
      .execute_with(execution, step, extra, cancel, Some(execution.cancellation()))
      .await
  }

  /// Execute a compensation step. Cancelling the execution does not stop
  /// it; only the step deadline does.
  #[instrument(
    name = "step_compensate",
    skip(self, execution, step),
    fields(
      execution_id = %execution.id(),
      step_id = %step.id,
      tool = %step.tool,
    )
  )]
  pub async fn compensate(
    &self,
    execution: &WorkflowExecution,
    step: &WorkflowStepDef,
  ) -> Result<Value, OrchestratorError> {
    self
      .execute_with(execution, step, None, &CancellationToken::new(), None)
      .await
  }

  async fn execute_with(
    &self,
    execution: &WorkflowExecution,
    step: &WorkflowStepDef,
    extra: Option<ToolInputs>,
    cancel: &CancellationToken,
    execution_cancel: Option<&CancellationToken>,
  ) -> Result<Value, OrchestratorError> {
    let mut inputs =
      resolve_inputs(&step.inputs, execution.context()).map_err(|source| {
        OrchestratorError::Resolution {
          step_id: step.id.clone(),
          source,
        }
      })?;
    if let Some(extra) = extra {
      inputs.extend(extra);
    }

    let tool = self
      .registry
      .get(&step.tool)
      .ok_or_else(|| OrchestratorError::ToolNotFound {
        step_id: step.id.clone(),
        tool: step.tool.clone(),
      })?;

    if step.retry.effective_attempts() <= 1 {
      return self.invoke(&tool, step, inputs, execution_cancel, cancel).await;
    }

    let max_attempts = step.retry.effective_attempts();
    retry_with_backoff(&step.retry, self.retry_base_delay, cancel, |attempt| {
      let tool = tool.clone();
      let inputs = inputs.clone();
      async move {
        let result = self.invoke(&tool, step, inputs, execution_cancel, cancel).await;
        if let Err(e) = &result {
          execution.record(
            ExecutionLogEntry::warning(format!(
              "Attempt {}/{} failed for step {}: {}",
              attempt, max_attempts, step.id, e
            ))
            .for_step(&step.id)
            .with_data(json!({ "attempt": attempt, "error": e.to_string() })),
          );
        }
        result
      }
    })
    .await
  }

  async fn invoke(
    &self,
    tool: &Arc<dyn Tool>,
    step: &WorkflowStepDef,
    inputs: ToolInputs,
    execution_cancel: Option<&CancellationToken>,
    cancel: &CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    let timeout = self.timeout_for(step);
    let tool_cancel = cancel.child_token();
    let execution_cancelled = async {
      match execution_cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
      }
    };

    debug!(timeout_ms = timeout.as_millis() as u64, "invoking tool");

    let outcome = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
      _ = execution_cancelled => {
        tool_cancel.cancel();
        return Err(OrchestratorError::Cancelled);
      }
      outcome = tokio::time::timeout(timeout, tool.invoke(inputs, tool_cancel.clone())) => outcome,
    };

    match outcome {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(ToolError::Cancelled)) if tool_cancel.is_cancelled() => Err(OrchestratorError::Cancelled),
      Ok(Err(source)) => Err(OrchestratorError::ToolExecution {
        step_id: step.id.clone(),
        tool: step.tool.clone(),
        source,
      }),
      Err(_) => {
        tool_cancel.cancel();
        warn!(timeout_ms = timeout.as_millis() as u64, "step deadline exceeded");
        Err(OrchestratorError::Timeout {
          step_id: step.id.clone(),
          timeout_ms: timeout.as_millis() as u64,
        })
      }
    }
  }
}
