//! Shared per-execution state.
//!
//! Values are `serde_json::Value`, so the context holds whatever a tool
//! returned without losing its shape. The `get_*` accessors give typed reads
//! that return `None` when the key is absent or holds a different variant.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ExecutionError;
use crate::finding::Finding;

#[derive(Debug, Default)]
struct ContextState {
  data: HashMap<String, Value>,
  findings: Vec<Finding>,
  metadata: serde_json::Map<String, Value>,
  next_finding: u64,
  sealed: bool,
}

/// Concurrency-safe key/value store and findings list for one execution.
///
/// Readers proceed concurrently; every write takes the lock exclusively.
#[derive(Debug, Default)]
pub struct WorkflowContext {
  state: RwLock<ContextState>,
}

impl WorkflowContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store `value` under `key`, replacing any previous value.
  pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), ExecutionError> {
    let key = key.into();
    let mut state = self.state.write();
    if state.sealed {
      return Err(ExecutionError::Sealed { key });
    }
    state.data.insert(key, value);
    Ok(())
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.state.read().data.get(key).cloned()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.state.read().data.contains_key(key)
  }

  pub fn get_str(&self, key: &str) -> Option<String> {
    match self.state.read().data.get(key)? {
      Value::String(s) => Some(s.clone()),
      _ => None,
    }
  }

  /// Numeric read. Integers are widened to `f64`.
  pub fn get_f64(&self, key: &str) -> Option<f64> {
    self.state.read().data.get(key)?.as_f64()
  }

  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.state.read().data.get(key)?.as_i64()
  }

  pub fn get_bool(&self, key: &str) -> Option<bool> {
    self.state.read().data.get(key)?.as_bool()
  }

  pub fn get_map(&self, key: &str) -> Option<serde_json::Map<String, Value>> {
    self.state.read().data.get(key)?.as_object().cloned()
  }

  pub fn get_array(&self, key: &str) -> Option<Vec<Value>> {
    self.state.read().data.get(key)?.as_array().cloned()
  }

  /// All keys currently stored, sorted.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.state.read().data.keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Copy of every key/value pair.
  pub fn snapshot(&self) -> serde_json::Map<String, Value> {
    self
      .state
      .read()
      .data
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Append a finding, assigning it the next id and the current time.
  ///
  /// Returns the assigned id.
  pub fn add_finding(&self, mut finding: Finding) -> Result<String, ExecutionError> {
    let mut state = self.state.write();
    if state.sealed {
      return Err(ExecutionError::Sealed {
        key: "findings".to_string(),
      });
    }
    finding.id = format!("finding_{}", state.next_finding);
    finding.timestamp = Utc::now();
    state.next_finding += 1;
    let id = finding.id.clone();
    state.findings.push(finding);
    Ok(id)
  }

  /// Findings in insertion order.
  pub fn findings(&self) -> Vec<Finding> {
    self.state.read().findings.clone()
  }

  pub fn set_metadata(&self, key: impl Into<String>, value: Value) -> Result<(), ExecutionError> {
    let key = key.into();
    let mut state = self.state.write();
    if state.sealed {
      return Err(ExecutionError::Sealed { key });
    }
    state.metadata.insert(key, value);
    Ok(())
  }

  pub fn metadata(&self, key: &str) -> Option<Value> {
    self.state.read().metadata.get(key).cloned()
  }

  /// Reject all further writes.
  pub fn seal(&self) {
    self.state.write().sealed = true;
  }

  pub fn is_sealed(&self) -> bool {
    self.state.read().sealed
  }
}
