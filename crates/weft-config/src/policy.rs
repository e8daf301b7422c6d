use serde::{Deserialize, Serialize};

/// Per-step retry settings.
///
/// Backoff is linear: the wait before attempt `n` (1-based, first retry is
/// attempt 2) is `(n - 1) * initial_delay`, capped at `max_delay`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts including the first. `0` and `1` both mean "no retry".
  #[serde(default)]
  pub max_attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub initial_delay_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_delay_ms: Option<u64>,
}

impl RetryPolicy {
  pub fn attempts(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      ..Self::default()
    }
  }

  /// Number of attempts to make, never less than one.
  pub fn effective_attempts(&self) -> u32 {
    self.max_attempts.max(1)
  }
}

/// Workflow-wide reaction to step failures, applied by a whole-definition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
  #[default]
  FailFast,
  Continue,
  Compensate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingPolicy {
  #[serde(default)]
  pub strategy: ErrorStrategy,
  /// With `continue`, fail the run once more than this many steps failed.
  /// `0` means unlimited.
  #[serde(default)]
  pub max_errors: u32,
}

/// What a single step does when it fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
  #[default]
  Fail,
  Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepErrorHandling {
  #[serde(default)]
  pub on_error: OnError,
  /// Step id run to undo this step under the `compensate` strategy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fallback_step: Option<String>,
}
