use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use weft_config::SagaTransaction;
use weft_workflow::ExecutionLogEntry;

use super::Scope;
use crate::error::OrchestratorError;

impl Scope {
  /// Run each transaction's action in order, storing results under
  /// `saga.<name>.result`. On the first failure, compensate the completed
  /// transactions in reverse order and return the failure that triggered
  /// the rollback.
  pub(crate) async fn saga(
    &self,
    transactions: &[SagaTransaction],
    cancel: &CancellationToken,
  ) -> Result<(), OrchestratorError> {
    // A cancel mid-saga must not seal the log before rollback is recorded.
    let _hold = self.execution.hold_seal();
    let mut completed: Vec<&SagaTransaction> = Vec::with_capacity(transactions.len());

    for transaction in transactions {
      self.record(ExecutionLogEntry::info(format!(
        "Executing transaction: {}",
        transaction.name
      )));

      let outcome = match self.checkpoint(cancel).await {
        Ok(()) => self.run_step(&transaction.action, None, cancel).await,
        Err(e) => Err(e),
      };
      let outcome = outcome.and_then(|result| {
        self
          .execution
          .context()
          .set(format!("saga.{}.result", transaction.name), result)
          .map_err(OrchestratorError::from)
      });

      if let Err(e) = outcome {
        self.record(
          ExecutionLogEntry::error(format!("Transaction {} failed", transaction.name))
            .with_data(serde_json::json!({ "error": e.to_string() })),
        );
        self.rollback(&completed).await;
        return Err(OrchestratorError::SagaFailed {
          transaction: transaction.name.clone(),
          source: Box::new(e),
        });
      }

      completed.push(transaction);
    }

    self.record(ExecutionLogEntry::info("Saga completed successfully"));
    Ok(())
  }

  /// Best-effort compensation, newest first.
  ///
  /// Compensations ignore both the caller's token and the execution's
  /// cancellation; each one is still bounded by its step deadline.
  async fn rollback(&self, completed: &[&SagaTransaction]) {
    warn!(
      execution_id = %self.execution.id(),
      transactions = completed.len(),
      "saga_rollback_started"
    );
    self.record(ExecutionLogEntry::info("Starting saga rollback"));

    for transaction in completed.iter().rev() {
      let Some(compensation) = &transaction.compensation else {
        self.record(ExecutionLogEntry::warning(format!(
          "No compensation defined for transaction: {}",
          transaction.name
        )));
        continue;
      };

      self.record(ExecutionLogEntry::info(format!(
        "Executing compensation for: {}",
        transaction.name
      )));

      if let Err(e) = self.run_compensation(compensation).await {
        let err = OrchestratorError::SagaRollback {
          transaction: transaction.name.clone(),
          source: Box::new(e),
        };
        error!(
          execution_id = %self.execution.id(),
          transaction = %transaction.name,
          error = %err,
          "compensation_failed"
        );
        self.record(ExecutionLogEntry::error(err.to_string()));
      }
    }

    info!(execution_id = %self.execution.id(), "saga_rollback_finished");
  }
}
