use tokio_util::sync::CancellationToken;
use tracing::info;
use weft_config::WorkflowStepDef;

use super::{Absorb, Scope};
use crate::error::OrchestratorError;
use crate::pool::WorkerPool;

impl Scope {
  /// Run `steps` concurrently, at most `max_concurrent` at a time.
  ///
  /// Conditions and dependencies are checked when a step's task starts;
  /// unmet ones skip the step.
  /// Every step runs to completion whatever its siblings do. Failures that
  /// are not absorbed are reported together once all steps have finished,
  /// with the first one in step order as the cause. Returns how many
  /// failures were absorbed.
  pub(crate) async fn parallel(
    &self,
    steps: &[WorkflowStepDef],
    max_concurrent: usize,
    absorb: Absorb,
    cancel: &CancellationToken,
  ) -> Result<usize, OrchestratorError> {
    let pool = WorkerPool::bounded(max_concurrent)?;

    info!(
      execution_id = %self.execution.id(),
      steps = steps.len(),
      max_concurrent,
      "parallel_started"
    );

    let tasks = steps.iter().cloned().map(|step| {
      let scope = self.clone();
      let cancel = cancel.clone();
      async move {
        if let Some(reason) = scope.skip_reason(&step) {
          scope.record_skipped(&step, &reason);
          return Ok(());
        }
        scope.run_step(&step, None, &cancel).await.map(|_| ())
      }
    });
    let results = pool.run(tasks).await;

    let mut absorbed = 0;
    let mut failed = Vec::new();
    let mut first_error = None;

    for (step, joined) in steps.iter().zip(results) {
      let err = match joined {
        Ok(Ok(())) => continue,
        Ok(Err(e)) => e,
        Err(e) => {
          self.record_step_error(&step.id, &e);
          e
        }
      };

      if absorb.absorbs(step, &err) {
        absorbed += 1;
        continue;
      }

      failed.push(step.id.clone());
      if first_error.is_none() {
        first_error = Some(err);
      }
    }

    match first_error {
      Some(source) => Err(OrchestratorError::ParallelFailed {
        failed,
        total: steps.len(),
        source: Box::new(source),
      }),
      None => Ok(absorbed),
    }
  }
}
