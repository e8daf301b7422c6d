//! A single run of a workflow definition.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use weft_config::WorkflowDefinition;

use crate::context::WorkflowContext;
use crate::error::ExecutionError;
use crate::finding::Finding;
use crate::log::{ExecutionLog, ExecutionLogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
  Created,
  Running,
  Paused,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  /// Allowed edges of the lifecycle state machine.
  pub fn can_transition_to(self, next: ExecutionState) -> bool {
    use ExecutionState::*;
    matches!(
      (self, next),
      (Created, Running)
        | (Created, Failed)
        | (Created, Cancelled)
        | (Running, Paused)
        | (Running, Completed)
        | (Running, Failed)
        | (Running, Cancelled)
        | (Paused, Running)
        | (Paused, Failed)
        | (Paused, Cancelled)
    )
  }
}

impl fmt::Display for ExecutionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Created => "created",
      Self::Running => "running",
      Self::Paused => "paused",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// One run of a [`WorkflowDefinition`].
///
/// Shared behind an `Arc` between the orchestrator and every task it spawns
/// for this run. State changes go through [`WorkflowExecution::transition`];
/// entering a terminal state seals the context and the log, unless a
/// [`SealHold`] is outstanding, in which case sealing happens when the last
/// hold is released.
#[derive(Debug)]
pub struct WorkflowExecution {
  id: String,
  definition: Arc<WorkflowDefinition>,
  state: watch::Sender<ExecutionState>,
  context: WorkflowContext,
  log: ExecutionLog,
  current_step: AtomicUsize,
  started_at: DateTime<Utc>,
  ended_at: RwLock<Option<DateTime<Utc>>>,
  error: RwLock<Option<String>>,
  cancel: CancellationToken,
  seal_holds: Mutex<usize>,
}

impl WorkflowExecution {
  pub fn new(id: impl Into<String>, definition: Arc<WorkflowDefinition>) -> Self {
    let (state, _) = watch::channel(ExecutionState::Created);
    Self {
      id: id.into(),
      definition,
      state,
      context: WorkflowContext::new(),
      log: ExecutionLog::new(),
      current_step: AtomicUsize::new(0),
      started_at: Utc::now(),
      ended_at: RwLock::new(None),
      error: RwLock::new(None),
      cancel: CancellationToken::new(),
      seal_holds: Mutex::new(0),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn definition(&self) -> &WorkflowDefinition {
    &self.definition
  }

  pub fn state(&self) -> ExecutionState {
    *self.state.borrow()
  }

  pub fn context(&self) -> &WorkflowContext {
    &self.context
  }

  pub fn log(&self) -> &ExecutionLog {
    &self.log
  }

  /// Append to the audit log. Entries written after a terminal transition
  /// are dropped.
  pub fn record(&self, entry: ExecutionLogEntry) {
    self.log.append(entry);
  }

  pub fn current_step(&self) -> usize {
    self.current_step.load(Ordering::SeqCst)
  }

  pub fn set_current_step(&self, index: usize) {
    self.current_step.store(index, Ordering::SeqCst);
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn ended_at(&self) -> Option<DateTime<Utc>> {
    *self.ended_at.read()
  }

  /// The error that failed this execution, if any.
  pub fn error(&self) -> Option<String> {
    self.error.read().clone()
  }

  /// Token cancelled when the execution enters `Cancelled`.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Move to `next`, returning the previous state.
  pub fn transition(&self, next: ExecutionState) -> Result<ExecutionState, ExecutionError> {
    let mut previous = self.state();
    let mut allowed = false;
    self.state.send_if_modified(|current| {
      previous = *current;
      allowed = current.can_transition_to(next);
      if allowed {
        *current = next;
      }
      allowed
    });

    if !allowed {
      if previous.is_terminal() {
        return Err(ExecutionError::Terminal {
          execution_id: self.id.clone(),
          state: previous,
        });
      }
      return Err(ExecutionError::InvalidTransition {
        from: previous,
        to: next,
      });
    }

    info!(
      execution_id = %self.id,
      from = %previous,
      to = %next,
      "execution_state_changed"
    );

    if next.is_terminal() {
      *self.ended_at.write() = Some(Utc::now());
      if next == ExecutionState::Cancelled {
        self.cancel.cancel();
      }
      let holds = self.seal_holds.lock();
      if *holds == 0 {
        self.seal();
      }
    }

    Ok(previous)
  }

  /// Keep the context and log writable past a terminal transition until the
  /// returned hold is dropped. Used by work that must finish recording after
  /// a cancel, such as saga compensation.
  pub fn hold_seal(&self) -> SealHold<'_> {
    *self.seal_holds.lock() += 1;
    SealHold { execution: self }
  }

  fn seal(&self) {
    self.context.seal();
    self.log.seal();
  }

  /// Move `Created` to `Running`; a running or paused execution is left
  /// as is. Fails for terminal executions.
  pub fn ensure_started(&self) -> Result<(), ExecutionError> {
    match self.state() {
      ExecutionState::Created => self.transition(ExecutionState::Running).map(|_| ()),
      ExecutionState::Running | ExecutionState::Paused => Ok(()),
      state => Err(ExecutionError::Terminal {
        execution_id: self.id.clone(),
        state,
      }),
    }
  }

  /// Record `error` and move to `Failed`.
  pub fn fail(&self, error: impl Into<String>) -> Result<(), ExecutionError> {
    let error = error.into();
    if self.state().is_terminal() {
      return Err(ExecutionError::Terminal {
        execution_id: self.id.clone(),
        state: self.state(),
      });
    }
    self.log.append(ExecutionLogEntry::error(format!("Workflow failed: {}", error)));
    *self.error.write() = Some(error);
    self.transition(ExecutionState::Failed).map(|_| ())
  }

  /// Wait at a step boundary while the execution is paused.
  ///
  /// Returns immediately when running. Errors if the execution is cancelled
  /// (directly or through `cancel`) or otherwise terminal.
  pub async fn wait_while_paused(&self, cancel: &CancellationToken) -> Result<(), ExecutionError> {
    let mut rx = self.state.subscribe();
    loop {
      let state = *rx.borrow_and_update();
      match state {
        ExecutionState::Created | ExecutionState::Running => return Ok(()),
        ExecutionState::Paused => {
          tokio::select! {
            changed = rx.changed() => {
              if changed.is_err() {
                return Err(ExecutionError::Cancelled);
              }
            }
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
          }
        }
        ExecutionState::Cancelled => return Err(ExecutionError::Cancelled),
        state => {
          return Err(ExecutionError::Terminal {
            execution_id: self.id.clone(),
            state,
          });
        }
      }
    }
  }

  /// Serializable view for status/reporting layers.
  pub fn snapshot(&self) -> ExecutionSnapshot {
    ExecutionSnapshot {
      execution_id: self.id.clone(),
      workflow_id: self.definition.id.clone(),
      state: self.state(),
      current_step: self.current_step(),
      started_at: self.started_at,
      ended_at: self.ended_at(),
      error: self.error(),
      log: self.log.entries(),
      findings: self.context.findings(),
      context: self.context.snapshot(),
    }
  }
}

/// Defers sealing of a [`WorkflowExecution`] while alive.
#[derive(Debug)]
pub struct SealHold<'a> {
  execution: &'a WorkflowExecution,
}

impl Drop for SealHold<'_> {
  fn drop(&mut self) {
    let mut holds = self.execution.seal_holds.lock();
    *holds -= 1;
    if *holds == 0 && self.execution.state().is_terminal() {
      self.execution.seal();
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
  pub execution_id: String,
  pub workflow_id: String,
  pub state: ExecutionState,
  pub current_step: usize,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
  pub log: Vec<ExecutionLogEntry>,
  pub findings: Vec<Finding>,
  pub context: serde_json::Map<String, serde_json::Value>,
}
