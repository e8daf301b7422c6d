//! Append-only execution audit log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
  Info,
  Warning,
  Error,
}

/// Lifecycle outcome a log entry records for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Completed,
  Skipped,
  Error,
  Decision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
  pub timestamp: DateTime<Utc>,
  pub level: LogLevel,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<StepStatus>,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<serde_json::Value>,
}

impl ExecutionLogEntry {
  fn new(level: LogLevel, message: impl Into<String>) -> Self {
    Self {
      timestamp: Utc::now(),
      level,
      step_id: None,
      status: None,
      message: message.into(),
      data: None,
    }
  }

  pub fn info(message: impl Into<String>) -> Self {
    Self::new(LogLevel::Info, message)
  }

  pub fn warning(message: impl Into<String>) -> Self {
    Self::new(LogLevel::Warning, message)
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::new(LogLevel::Error, message)
  }

  pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
    self.step_id = Some(step_id.into());
    self
  }

  pub fn with_status(mut self, status: StepStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn with_data(mut self, data: serde_json::Value) -> Self {
    self.data = Some(data);
    self
  }
}

#[derive(Debug, Default)]
struct LogState {
  entries: Vec<ExecutionLogEntry>,
  sealed: bool,
}

/// Ordered, append-only list of [`ExecutionLogEntry`].
///
/// Entries are never reordered or removed. After [`ExecutionLog::seal`] new
/// entries are dropped.
#[derive(Debug, Default)]
pub struct ExecutionLog {
  state: RwLock<LogState>,
}

impl ExecutionLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an entry. Returns `false` if the log is sealed.
  pub fn append(&self, entry: ExecutionLogEntry) -> bool {
    let mut state = self.state.write();
    if state.sealed {
      return false;
    }
    state.entries.push(entry);
    true
  }

  pub fn entries(&self) -> Vec<ExecutionLogEntry> {
    self.state.read().entries.clone()
  }

  pub fn len(&self) -> usize {
    self.state.read().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Entries recorded for one step, in order.
  pub fn entries_for_step(&self, step_id: &str) -> Vec<ExecutionLogEntry> {
    self
      .state
      .read()
      .entries
      .iter()
      .filter(|e| e.step_id.as_deref() == Some(step_id))
      .cloned()
      .collect()
  }

  /// Whether `step_id` has a "completed" entry.
  pub fn has_completed(&self, step_id: &str) -> bool {
    self
      .state
      .read()
      .entries
      .iter()
      .any(|e| e.step_id.as_deref() == Some(step_id) && e.status == Some(StepStatus::Completed))
  }

  pub fn seal(&self) {
    self.state.write().sealed = true;
  }
}
