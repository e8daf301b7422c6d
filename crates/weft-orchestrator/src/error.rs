use thiserror::Error;
use weft_config::DefinitionError;
use weft_resolver::{ConditionError, ResolveError};
use weft_tool::ToolError;
use weft_workflow::{ExecutionError, ExecutionState};

/// Errors raised while orchestrating workflow executions.
#[derive(Debug, Error)]
pub enum OrchestratorError {
  /// A step input referenced a context value that does not exist.
  #[error("failed to resolve inputs for step '{step_id}': {source}")]
  Resolution {
    step_id: String,
    #[source]
    source: ResolveError,
  },

  #[error("tool '{tool}' not found for step '{step_id}'")]
  ToolNotFound { step_id: String, tool: String },

  #[error("tool '{tool}' failed in step '{step_id}': {source}")]
  ToolExecution {
    step_id: String,
    tool: String,
    #[source]
    source: ToolError,
  },

  #[error("step '{step_id}' timed out after {timeout_ms}ms")]
  Timeout { step_id: String, timeout_ms: u64 },

  #[error("execution cancelled")]
  Cancelled,

  #[error("condition evaluation failed: {source}")]
  ConditionEvaluation {
    #[from]
    source: ConditionError,
  },

  /// A compensation failed during rollback. Logged, never returned by a saga.
  #[error("compensation for transaction '{transaction}' failed: {source}")]
  SagaRollback {
    transaction: String,
    #[source]
    source: Box<OrchestratorError>,
  },

  #[error("step '{step_id}' failed: {source}")]
  StepFailed {
    step_id: String,
    #[source]
    source: Box<OrchestratorError>,
  },

  #[error("{count} of {total} parallel steps failed ({failed:?}): {source}", count = .failed.len())]
  ParallelFailed {
    failed: Vec<String>,
    total: usize,
    #[source]
    source: Box<OrchestratorError>,
  },

  #[error("loop iteration {iteration} failed: {source}")]
  LoopIteration {
    iteration: u32,
    #[source]
    source: Box<OrchestratorError>,
  },

  #[error("all {count} map operations failed")]
  MapAllFailed { count: usize },

  #[error("reduce step failed: {source}")]
  ReduceFailed {
    #[source]
    source: Box<OrchestratorError>,
  },

  /// The saga stopped at `transaction` and rolled back what had completed.
  #[error("saga failed at transaction '{transaction}': {source}")]
  SagaFailed {
    transaction: String,
    #[source]
    source: Box<OrchestratorError>,
  },

  #[error("{failures} step failures exceed the limit of {max_errors}")]
  ErrorLimitExceeded { failures: usize, max_errors: u32 },

  #[error("workflow execution not found: {execution_id}")]
  ExecutionNotFound { execution_id: String },

  #[error("invalid state transition: {from} -> {to}")]
  InvalidTransition {
    from: ExecutionState,
    to: ExecutionState,
  },

  #[error("execution {execution_id} is {state} and accepts no further changes")]
  Terminal {
    execution_id: String,
    state: ExecutionState,
  },

  #[error("execution {execution_id} is still {state}")]
  NotTerminal {
    execution_id: String,
    state: ExecutionState,
  },

  #[error("context is sealed; cannot write key '{key}'")]
  ContextSealed { key: String },

  #[error("missing required input: {name}")]
  MissingInput { name: String },

  #[error("invalid configuration: {message}")]
  InvalidConfig { message: String },

  #[error("invalid workflow definition: {0}")]
  Definition(#[from] DefinitionError),

  #[error("task join error: {message}")]
  TaskJoin { message: String },
}

impl OrchestratorError {
  /// Whether this failure aborts the enclosing pattern even when the step
  /// is marked `continue_on_fail`.
  pub fn is_fatal_for_step(&self) -> bool {
    matches!(
      self,
      Self::Resolution { .. } | Self::ToolNotFound { .. } | Self::Cancelled | Self::TaskJoin { .. }
    )
  }

  /// Whether another attempt of the same step may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::ToolExecution { .. } | Self::Timeout { .. })
  }

  /// Whether cancellation is the root cause, looking through aggregates.
  pub fn is_cancellation(&self) -> bool {
    match self {
      Self::Cancelled => true,
      Self::StepFailed { source, .. }
      | Self::ParallelFailed { source, .. }
      | Self::LoopIteration { source, .. }
      | Self::ReduceFailed { source }
      | Self::SagaFailed { source, .. } => source.is_cancellation(),
      _ => false,
    }
  }

  pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
    Self::InvalidConfig {
      message: message.into(),
    }
  }
}

impl From<ExecutionError> for OrchestratorError {
  fn from(err: ExecutionError) -> Self {
    match err {
      ExecutionError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
      ExecutionError::Terminal {
        execution_id,
        state,
      } => Self::Terminal {
        execution_id,
        state,
      },
      ExecutionError::Cancelled => Self::Cancelled,
      ExecutionError::Sealed { key } => Self::ContextSealed { key },
    }
  }
}
