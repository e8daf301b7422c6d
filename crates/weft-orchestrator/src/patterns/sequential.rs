use tokio_util::sync::CancellationToken;
use weft_config::WorkflowStepDef;

use super::Scope;
use crate::error::OrchestratorError;

/// Which step failures a pattern absorbs instead of aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Absorb {
  /// Only steps marked `continue_on_fail` or `on_error: skip`.
  Marked,
  /// Every step, as under the `continue` error strategy.
  All,
}

impl Absorb {
  /// Resolution, missing tools and cancellation are never absorbed.
  pub(crate) fn absorbs(self, step: &WorkflowStepDef, err: &OrchestratorError) -> bool {
    !err.is_fatal_for_step() && (self == Absorb::All || step.absorbs_failure())
  }
}

impl Scope {
  /// Run `steps` strictly in order. Returns how many failures were absorbed.
  pub(crate) async fn sequential(
    &self,
    steps: &[WorkflowStepDef],
    cancel: &CancellationToken,
  ) -> Result<usize, OrchestratorError> {
    self.sequence(steps, 0, Absorb::Marked, cancel).await
  }

  /// [`Scope::sequential`] with an explicit absorb mode. `first_index` is
  /// the position of `steps[0]` in the definition, for progress reporting.
  pub(crate) async fn sequence(
    &self,
    steps: &[WorkflowStepDef],
    first_index: usize,
    absorb: Absorb,
    cancel: &CancellationToken,
  ) -> Result<usize, OrchestratorError> {
    let mut absorbed = 0;

    for (offset, step) in steps.iter().enumerate() {
      self.checkpoint(cancel).await?;
      self.execution.set_current_step(first_index + offset);

      if let Some(reason) = self.skip_reason(step) {
        self.record_skipped(step, &reason);
        continue;
      }

      match self.run_step(step, None, cancel).await {
        Ok(_) => {}
        Err(e) if absorb.absorbs(step, &e) => absorbed += 1,
        Err(e) => {
          return Err(OrchestratorError::StepFailed {
            step_id: step.id.clone(),
            source: Box::new(e),
          });
        }
      }
    }

    Ok(absorbed)
  }
}
