use thiserror::Error;

/// Errors a tool can return from an invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
  /// An input was missing or had the wrong shape.
  #[error("invalid input '{input}': {message}")]
  InvalidInput { input: String, message: String },

  /// The tool ran and failed.
  #[error("{message}")]
  Failed { message: String },

  /// The tool observed cancellation and stopped.
  #[error("tool invocation cancelled")]
  Cancelled,
}

impl ToolError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  pub fn invalid_input(input: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidInput {
      input: input.into(),
      message: message.into(),
    }
  }
}
