//! Execution registry, lifecycle and pattern entry points.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use weft_config::{
  ErrorStrategy, LoopConfig, SagaTransaction, StepCondition, StepType, WorkflowDefinition,
  WorkflowStepDef,
};
use weft_resolver::{parse_reference, resolve_value};
use weft_tool::ToolRegistry;
use weft_workflow::{ExecutionState, WorkflowExecution};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::executor::StepExecutor;
use crate::patterns::{Absorb, Scope};

/// Owns every execution it creates and runs patterns against them.
///
/// Executions are addressed by id. Each has its own context and log; the
/// orchestrator shares nothing else between them.
pub struct Orchestrator {
  config: OrchestratorConfig,
  executor: Arc<StepExecutor>,
  executions: RwLock<HashMap<String, Arc<WorkflowExecution>>>,
}

impl Orchestrator {
  /// Create an orchestrator with default settings.
  pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
    Self::build(registry, OrchestratorConfig::default())
  }

  pub fn with_config(
    registry: Arc<dyn ToolRegistry>,
    config: OrchestratorConfig,
  ) -> Result<Self, OrchestratorError> {
    config.validate()?;
    Ok(Self::build(registry, config))
  }

  fn build(registry: Arc<dyn ToolRegistry>, config: OrchestratorConfig) -> Self {
    Self {
      executor: Arc::new(StepExecutor::new(registry, &config)),
      config,
      executions: RwLock::new(HashMap::new()),
    }
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  // --- Registry ---

  /// Register a new execution of `definition`.
  ///
  /// Declared inputs missing from `inputs` take their default; a required
  /// input with neither fails with [`OrchestratorError::MissingInput`].
  /// Every input is written to the context under its own name.
  pub fn create_execution(
    &self,
    definition: impl Into<Arc<WorkflowDefinition>>,
    mut inputs: Map<String, Value>,
  ) -> Result<String, OrchestratorError> {
    let definition = definition.into();
    definition.validate()?;

    for declared in &definition.inputs {
      if inputs.contains_key(&declared.name) {
        continue;
      }
      match &declared.default {
        Some(default) => {
          inputs.insert(declared.name.clone(), default.clone());
        }
        None if declared.required => {
          return Err(OrchestratorError::MissingInput {
            name: declared.name.clone(),
          });
        }
        None => {}
      }
    }

    let execution_id = uuid::Uuid::new_v4().to_string();
    let execution = Arc::new(WorkflowExecution::new(
      execution_id.clone(),
      definition.clone(),
    ));
    for (key, value) in inputs {
      execution.context().set(key, value)?;
    }

    self
      .executions
      .write()
      .insert(execution_id.clone(), execution);

    info!(
      execution_id = %execution_id,
      workflow_id = %definition.id,
      "execution_created"
    );
    Ok(execution_id)
  }

  pub fn execution(&self, execution_id: &str) -> Result<Arc<WorkflowExecution>, OrchestratorError> {
    self
      .executions
      .read()
      .get(execution_id)
      .cloned()
      .ok_or_else(|| OrchestratorError::ExecutionNotFound {
        execution_id: execution_id.to_string(),
      })
  }

  /// All executions, oldest first.
  pub fn list_executions(&self) -> Vec<Arc<WorkflowExecution>> {
    let mut executions: Vec<_> = self.executions.read().values().cloned().collect();
    executions.sort_by(|a, b| {
      a.started_at()
        .cmp(&b.started_at())
        .then_with(|| a.id().cmp(b.id()))
    });
    executions
  }

  /// Drop a finished execution from the registry.
  pub fn remove_execution(
    &self,
    execution_id: &str,
  ) -> Result<Arc<WorkflowExecution>, OrchestratorError> {
    let mut executions = self.executions.write();
    let execution =
      executions
        .get(execution_id)
        .ok_or_else(|| OrchestratorError::ExecutionNotFound {
          execution_id: execution_id.to_string(),
        })?;

    let state = execution.state();
    if !state.is_terminal() {
      return Err(OrchestratorError::NotTerminal {
        execution_id: execution_id.to_string(),
        state,
      });
    }

    executions
      .remove(execution_id)
      .ok_or_else(|| OrchestratorError::ExecutionNotFound {
        execution_id: execution_id.to_string(),
      })
  }

  // --- Lifecycle ---

  pub fn start(&self, execution_id: &str) -> Result<(), OrchestratorError> {
    let execution = self.execution(execution_id)?;
    let state = execution.state();
    if matches!(state, ExecutionState::Running | ExecutionState::Paused) {
      return Err(OrchestratorError::InvalidTransition {
        from: state,
        to: ExecutionState::Running,
      });
    }
    execution.transition(ExecutionState::Running)?;
    Ok(())
  }

  /// Running steps finish; the next step waits until resumed.
  pub fn pause(&self, execution_id: &str) -> Result<(), OrchestratorError> {
    self
      .execution(execution_id)?
      .transition(ExecutionState::Paused)?;
    Ok(())
  }

  pub fn resume(&self, execution_id: &str) -> Result<(), OrchestratorError> {
    let execution = self.execution(execution_id)?;
    let state = execution.state();
    if !state.is_terminal() && state != ExecutionState::Paused {
      return Err(OrchestratorError::InvalidTransition {
        from: state,
        to: ExecutionState::Running,
      });
    }
    execution.transition(ExecutionState::Running)?;
    Ok(())
  }

  /// Cancel the execution; in-flight steps observe it and stop.
  pub fn cancel(&self, execution_id: &str) -> Result<(), OrchestratorError> {
    self
      .execution(execution_id)?
      .transition(ExecutionState::Cancelled)?;
    Ok(())
  }

  pub fn complete(&self, execution_id: &str) -> Result<(), OrchestratorError> {
    self
      .execution(execution_id)?
      .transition(ExecutionState::Completed)?;
    Ok(())
  }

  pub fn fail(&self, execution_id: &str, error: impl Into<String>) -> Result<(), OrchestratorError> {
    self.execution(execution_id)?.fail(error)?;
    Ok(())
  }

  // --- Patterns ---

  /// Look up an execution, move it to running if new, and scope it for a
  /// pattern run.
  fn scope(&self, execution_id: &str) -> Result<Scope, OrchestratorError> {
    let execution = self.execution(execution_id)?;
    execution.ensure_started()?;
    Ok(Scope::new(
      self.executor.clone(),
      execution,
      self.config.map_concurrency,
    ))
  }

  /// Execute one step and store its result under `<step_id>.output`.
  #[instrument(
    name = "pattern_step",
    skip(self, step, cancel),
    fields(step_id = %step.id)
  )]
  pub async fn execute_step(
    &self,
    execution_id: &str,
    step: &WorkflowStepDef,
    cancel: CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    self.scope(execution_id)?.run_step(step, None, &cancel).await
  }

  #[instrument(
    name = "pattern_sequential",
    skip(self, steps, cancel),
    fields(steps = steps.len())
  )]
  pub async fn execute_sequential(
    &self,
    execution_id: &str,
    steps: &[WorkflowStepDef],
    cancel: CancellationToken,
  ) -> Result<(), OrchestratorError> {
    self
      .scope(execution_id)?
      .sequential(steps, &cancel)
      .await
      .map(|_| ())
  }

  #[instrument(
    name = "pattern_parallel",
    skip(self, steps, cancel),
    fields(steps = steps.len())
  )]
  pub async fn execute_parallel(
    &self,
    execution_id: &str,
    steps: &[WorkflowStepDef],
    max_concurrent: usize,
    cancel: CancellationToken,
  ) -> Result<(), OrchestratorError> {
    self
      .scope(execution_id)?
      .parallel(steps, max_concurrent, Absorb::Marked, &cancel)
      .await
      .map(|_| ())
  }

  /// Returns which branch ran: `true` for `if_true`.
  #[instrument(
    name = "pattern_conditional",
    skip(self, condition, if_true, if_false, cancel),
    fields(operator = %condition.operator)
  )]
  pub async fn execute_conditional(
    &self,
    execution_id: &str,
    condition: &StepCondition,
    if_true: &[WorkflowStepDef],
    if_false: &[WorkflowStepDef],
    cancel: CancellationToken,
  ) -> Result<bool, OrchestratorError> {
    self
      .scope(execution_id)?
      .conditional(condition, if_true, if_false, &cancel)
      .await
  }

  /// Returns the number of iterations that ran.
  #[instrument(
    name = "pattern_loop",
    skip(self, steps, config, cancel),
    fields(max_iterations = config.max_iterations)
  )]
  pub async fn execute_loop(
    &self,
    execution_id: &str,
    steps: &[WorkflowStepDef],
    config: &LoopConfig,
    cancel: CancellationToken,
  ) -> Result<u32, OrchestratorError> {
    self.scope(execution_id)?.repeat(steps, config, &cancel).await
  }

  /// Returns the reduce step's output.
  #[instrument(
    name = "pattern_map_reduce",
    skip(self, map_step, reduce_step, items, cancel),
    fields(items = items.len())
  )]
  pub async fn execute_map_reduce(
    &self,
    execution_id: &str,
    map_step: &WorkflowStepDef,
    reduce_step: &WorkflowStepDef,
    items: Vec<Value>,
    cancel: CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    self
      .scope(execution_id)?
      .map_reduce(map_step, items, reduce_step, &cancel)
      .await
  }

  #[instrument(
    name = "pattern_saga",
    skip(self, transactions, cancel),
    fields(transactions = transactions.len())
  )]
  pub async fn execute_saga(
    &self,
    execution_id: &str,
    transactions: &[SagaTransaction],
    cancel: CancellationToken,
  ) -> Result<(), OrchestratorError> {
    self.scope(execution_id)?.saga(transactions, &cancel).await
  }

  // --- Whole-definition run ---

  /// Run the execution's definition to a terminal state.
  ///
  /// Consecutive `parallel` steps form one parallel group bounded by
  /// `default_max_concurrent`; everything else runs sequentially. The
  /// definition's error policy decides how failures are handled:
  ///
  /// - `fail_fast`: the first unabsorbed failure fails the run.
  /// - `continue`: every step failure is absorbed; with `max_errors > 0`
  ///   the run fails once more than that many steps failed.
  /// - `compensate`: steps run as a saga, each compensated by its
  ///   `fallback_step`. Fallback steps do not run forward.
  ///
  /// On success the execution is completed and the declared outputs are
  /// returned. On failure it is failed (or cancelled) with the error kept.
  #[instrument(
    name = "workflow_run",
    skip(self, cancel),
    fields(workflow_id = tracing::field::Empty)
  )]
  pub async fn run(
    &self,
    execution_id: &str,
    cancel: CancellationToken,
  ) -> Result<Map<String, Value>, OrchestratorError> {
    let scope = self.scope(execution_id)?;
    let execution = scope.execution.clone();
    let definition = execution.definition();
    tracing::Span::current().record("workflow_id", definition.id.as_str());

    info!(
      execution_id = %execution_id,
      strategy = ?definition.error_policy.strategy,
      steps = definition.steps.len(),
      "workflow_started"
    );

    let outcome = match definition.error_policy.strategy {
      ErrorStrategy::FailFast => self
        .run_groups(&scope, &definition.steps, Absorb::Marked, &cancel)
        .await
        .map(|_| ()),
      ErrorStrategy::Continue => {
        let max_errors = definition.error_policy.max_errors;
        match self
          .run_groups(&scope, &definition.steps, Absorb::All, &cancel)
          .await
        {
          Ok(failures) if max_errors > 0 && failures > max_errors as usize => {
            Err(OrchestratorError::ErrorLimitExceeded {
              failures,
              max_errors,
            })
          }
          Ok(_) => Ok(()),
          Err(e) => Err(e),
        }
      }
      ErrorStrategy::Compensate => scope.saga(&compensated_steps(definition), &cancel).await,
    };

    let outcome = match outcome {
      Ok(()) => execution.wait_while_paused(&cancel).await.map_err(Into::into),
      Err(e) => Err(e),
    };

    match outcome {
      Ok(()) => {
        let outputs = collect_outputs(&execution);
        execution.transition(ExecutionState::Completed)?;
        info!(execution_id = %execution_id, "workflow_completed");
        Ok(outputs)
      }
      Err(err) => {
        error!(execution_id = %execution_id, error = %err, "workflow_failed");
        if !execution.state().is_terminal() {
          let finalized = if err.is_cancellation() {
            execution.transition(ExecutionState::Cancelled).map(|_| ())
          } else {
            execution.fail(err.to_string())
          };
          if let Err(e) = finalized {
            warn!(execution_id = %execution_id, error = %e, "execution_finalize_failed");
          }
        }
        Err(err)
      }
    }
  }

  /// Run `steps` as alternating sequential and parallel groups. Returns
  /// the number of absorbed failures.
  async fn run_groups(
    &self,
    scope: &Scope,
    steps: &[WorkflowStepDef],
    absorb: Absorb,
    cancel: &CancellationToken,
  ) -> Result<usize, OrchestratorError> {
    let mut absorbed = 0;
    let mut index = 0;

    for group in steps.chunk_by(|a, b| is_parallel(a) == is_parallel(b)) {
      absorbed += if is_parallel(&group[0]) {
        scope.checkpoint(cancel).await?;
        scope.execution.set_current_step(index);
        scope
          .parallel(group, self.config.default_max_concurrent, absorb, cancel)
          .await?
      } else {
        scope.sequence(group, index, absorb, cancel).await?
      };
      index += group.len();
    }

    Ok(absorbed)
  }
}

fn is_parallel(step: &WorkflowStepDef) -> bool {
  step.step_type == StepType::Parallel
}

/// Forward steps as saga transactions, each compensated by its fallback.
fn compensated_steps(definition: &WorkflowDefinition) -> Vec<SagaTransaction> {
  let fallbacks: HashSet<&str> = definition
    .steps
    .iter()
    .filter_map(|step| step.error_handling.fallback_step.as_deref())
    .collect();

  definition
    .steps
    .iter()
    .filter(|step| !fallbacks.contains(step.id.as_str()))
    .map(|step| {
      let transaction = SagaTransaction::new(step.id.clone(), step.clone());
      match step
        .error_handling
        .fallback_step
        .as_deref()
        .and_then(|id| definition.get_step(id))
      {
        Some(fallback) => transaction.with_compensation(fallback.clone()),
        None => transaction,
      }
    })
    .collect()
}

/// Read each declared output from the context. `source` is a context key
/// (dotted paths allowed) or a full `${context.<path>}` reference.
fn collect_outputs(execution: &WorkflowExecution) -> Map<String, Value> {
  let mut outputs = Map::new();
  for output in &execution.definition().outputs {
    let reference = if parse_reference(&output.source).is_some() {
      output.source.clone()
    } else {
      format!("${{context.{}}}", output.source)
    };

    let value = match resolve_value(&Value::String(reference), execution.context()) {
      Ok(value) => value,
      Err(e) => {
        warn!(
          execution_id = %execution.id(),
          output = %output.name,
          error = %e,
          "output_unavailable"
        );
        Value::Null
      }
    };
    outputs.insert(output.name.clone(), value);
  }
  outputs
}
