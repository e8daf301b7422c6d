use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Orchestrator-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Step deadline when a step sets no `timeout_ms` (or sets zero).
  pub default_step_timeout_ms: u64,
  /// Bound for parallel step groups run by [`crate::Orchestrator::run`].
  pub default_max_concurrent: usize,
  /// Bound for the map phase of map-reduce. `None` runs every item at once.
  pub map_concurrency: Option<usize>,
  /// Backoff unit for retries whose policy has no `initial_delay_ms`.
  pub retry_base_delay_ms: u64,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      default_step_timeout_ms: 30_000,
      default_max_concurrent: 4,
      map_concurrency: None,
      retry_base_delay_ms: 1_000,
    }
  }
}

impl OrchestratorConfig {
  pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }

  pub fn default_step_timeout(&self) -> Duration {
    Duration::from_millis(self.default_step_timeout_ms)
  }

  pub fn retry_base_delay(&self) -> Duration {
    Duration::from_millis(self.retry_base_delay_ms)
  }

  /// Reject settings that would stall every execution.
  pub fn validate(&self) -> Result<(), OrchestratorError> {
    if self.default_step_timeout_ms == 0 {
      return Err(OrchestratorError::invalid_config(
        "default_step_timeout_ms must be greater than zero",
      ));
    }
    if self.default_max_concurrent == 0 {
      return Err(OrchestratorError::invalid_config(
        "default_max_concurrent must be greater than zero",
      ));
    }
    if self.map_concurrency == Some(0) {
      return Err(OrchestratorError::invalid_config(
        "map_concurrency must be greater than zero when set",
      ));
    }
    Ok(())
  }
}
