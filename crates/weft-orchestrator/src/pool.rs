//! Fan-out of concurrent tasks with an optional admission bound.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::OrchestratorError;

/// Runs a batch of futures as spawned tasks and joins every one of them.
///
/// A bounded pool admits at most `limit` tasks at a time through a counting
/// semaphore; an unbounded pool starts them all at once. Tasks never cancel
/// each other: a failing task has no effect on its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
  limit: Option<usize>,
}

impl WorkerPool {
  pub fn bounded(limit: usize) -> Result<Self, OrchestratorError> {
    Self::new(Some(limit))
  }

  pub fn unbounded() -> Self {
    Self { limit: None }
  }

  pub fn new(limit: Option<usize>) -> Result<Self, OrchestratorError> {
    if limit == Some(0) {
      return Err(OrchestratorError::invalid_config(
        "concurrency limit must be greater than zero",
      ));
    }
    Ok(Self { limit })
  }

  pub fn limit(&self) -> Option<usize> {
    self.limit
  }

  /// Run every task and return their outputs in submission order.
  ///
  /// A task that panics yields [`OrchestratorError::TaskJoin`] in its slot.
  pub async fn run<I, F, T>(&self, tasks: I) -> Vec<Result<T, OrchestratorError>>
  where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
  {
    let semaphore = self.limit.map(|n| Arc::new(Semaphore::new(n)));

    let handles: Vec<_> = tasks
      .into_iter()
      .map(|task| {
        let semaphore = semaphore.clone();
        tokio::spawn(async move {
          // The semaphore is never closed, so acquisition only fails if it
          // were; run unguarded in that case.
          let _permit = match semaphore {
            Some(semaphore) => semaphore.acquire_owned().await.ok(),
            None => None,
          };
          task.await
        })
      })
      .collect();

    futures::future::join_all(handles)
      .await
      .into_iter()
      .map(|joined| {
        joined.map_err(|e| OrchestratorError::TaskJoin {
          message: e.to_string(),
        })
      })
      .collect()
  }
}
