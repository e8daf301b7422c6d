use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;
use crate::io::{WorkflowInput, WorkflowOutput, WorkflowTrigger};
use crate::policy::ErrorHandlingPolicy;
use crate::step::WorkflowStepDef;

/// An immutable workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub triggers: Vec<WorkflowTrigger>,
  #[serde(default)]
  pub inputs: Vec<WorkflowInput>,
  pub steps: Vec<WorkflowStepDef>,
  #[serde(default)]
  pub outputs: Vec<WorkflowOutput>,
  #[serde(default)]
  pub error_policy: ErrorHandlingPolicy,
  #[serde(default)]
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowDefinition {
  /// Parse and validate a definition from JSON text.
  pub fn from_json(text: &str) -> Result<Self, DefinitionError> {
    let definition: Self = serde_json::from_str(text)?;
    definition.validate()?;
    Ok(definition)
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&WorkflowStepDef> {
    self.steps.iter().find(|s| s.id == step_id)
  }

  /// Check structural consistency of the step list.
  pub fn validate(&self) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for step in &self.steps {
      if !seen.insert(step.id.as_str()) {
        return Err(DefinitionError::DuplicateStepId {
          step_id: step.id.clone(),
        });
      }
      if step.tool.is_empty() {
        return Err(DefinitionError::MissingTool {
          step_id: step.id.clone(),
        });
      }
    }

    for step in &self.steps {
      for dependency in &step.depends_on {
        if !seen.contains(dependency.as_str()) {
          return Err(DefinitionError::UnknownDependency {
            step_id: step.id.clone(),
            dependency: dependency.clone(),
          });
        }
      }
      if let Some(fallback) = &step.error_handling.fallback_step {
        if !seen.contains(fallback.as_str()) {
          return Err(DefinitionError::UnknownFallback {
            step_id: step.id.clone(),
            fallback: fallback.clone(),
          });
        }
      }
    }

    Ok(())
  }
}
