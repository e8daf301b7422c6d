use thiserror::Error;

use crate::execution::ExecutionState;

#[derive(Debug, Error)]
pub enum ExecutionError {
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

  #[error("execution cancelled")]
  Cancelled,

  #[error("context is sealed; cannot write key '{key}'")]
  Sealed { key: String },
}
