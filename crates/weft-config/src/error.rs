use thiserror::Error;

/// Errors raised while validating a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("duplicate step id: {step_id}")]
  DuplicateStepId { step_id: String },

  #[error("step '{step_id}' depends on unknown step '{dependency}'")]
  UnknownDependency { step_id: String, dependency: String },

  #[error("step '{step_id}' names unknown fallback step '{fallback}'")]
  UnknownFallback { step_id: String, fallback: String },

  #[error("step '{step_id}' has no tool")]
  MissingTool { step_id: String },

  #[error("invalid workflow definition: {0}")]
  Parse(#[from] serde_json::Error),
}
