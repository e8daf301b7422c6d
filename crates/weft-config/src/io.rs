use serde::{Deserialize, Serialize};

/// How an execution of the workflow gets started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerType {
  Manual,
  Scheduled { cron: String },
  Event { event: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
  #[serde(flatten)]
  pub trigger_type: TriggerType,
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// A declared workflow input.
///
/// Inputs are written into the execution context under `name` when the
/// execution is created, so steps can reference them as `${context.<name>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
  pub name: String,
  #[serde(rename = "type", default)]
  pub input_type: String,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
  #[serde(default)]
  pub description: String,
}

/// A declared workflow output, read from the context key named by `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutput {
  pub name: String,
  #[serde(rename = "type", default)]
  pub output_type: String,
  pub source: String,
  #[serde(default)]
  pub description: String,
}
