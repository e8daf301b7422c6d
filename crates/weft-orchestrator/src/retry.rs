//! Retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use weft_config::RetryPolicy;

use crate::error::OrchestratorError;

/// Delay after failed attempt `attempt` (1-based): `attempt * unit`, capped
/// at the policy's `max_delay_ms`. `unit` is the policy's
/// `initial_delay_ms`, or `base_delay` when unset.
pub fn backoff_delay(policy: &RetryPolicy, base_delay: Duration, attempt: u32) -> Duration {
  let unit = policy
    .initial_delay_ms
    .map(Duration::from_millis)
    .unwrap_or(base_delay);
  let delay = unit.saturating_mul(attempt);
  match policy.max_delay_ms {
    Some(max) => delay.min(Duration::from_millis(max)),
    None => delay,
  }
}

/// Call `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. `op` receives the 1-based attempt number.
///
/// The wait between attempts stops early with
/// [`OrchestratorError::Cancelled`] when `cancel` fires. After the last
/// attempt the final error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T>(
  policy: &RetryPolicy,
  base_delay: Duration,
  cancel: &CancellationToken,
  mut op: F,
) -> Result<T, OrchestratorError>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, OrchestratorError>>,
{
  let max_attempts = policy.effective_attempts();
  let mut attempt = 1;

  loop {
    let err = match op(attempt).await {
      Ok(value) => return Ok(value),
      Err(err) => err,
    };

    if attempt >= max_attempts || !err.is_retryable() {
      return Err(err);
    }

    let delay = backoff_delay(policy, base_delay, attempt);
    warn!(
      attempt,
      max_attempts,
      delay_ms = delay.as_millis() as u64,
      error = %err,
      "retry_scheduled"
    );

    tokio::select! {
      _ = tokio::time::sleep(delay) => {}
      _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
    }

    attempt += 1;
  }
}
