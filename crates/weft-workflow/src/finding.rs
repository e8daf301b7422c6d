use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
  Anomaly,
  Correlation,
  RootCause,
  Impact,
  Recommendation,
}

/// Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
  Critical,
  High,
  Medium,
  Low,
  Info,
}

/// A structured observation recorded during an execution.
///
/// `id` and `timestamp` are assigned by [`crate::WorkflowContext::add_finding`];
/// whatever the caller put there is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  pub id: String,
  #[serde(rename = "type")]
  pub finding_type: FindingType,
  pub severity: FindingSeverity,
  pub description: String,
  #[serde(default)]
  pub evidence: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub source: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub related: Vec<String>,
}

impl Finding {
  pub fn new(
    finding_type: FindingType,
    severity: FindingSeverity,
    description: impl Into<String>,
  ) -> Self {
    Self {
      id: String::new(),
      finding_type,
      severity,
      description: description.into(),
      evidence: serde_json::Map::new(),
      source: String::new(),
      timestamp: Utc::now(),
      related: Vec::new(),
    }
  }

  pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.evidence.insert(key.into(), value.into());
    self
  }

  pub fn with_source(mut self, source: impl Into<String>) -> Self {
    self.source = source.into();
    self
  }

  pub fn with_related(mut self, finding_id: impl Into<String>) -> Self {
    self.related.push(finding_id.into());
    self
  }
}
