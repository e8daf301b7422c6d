use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;
use weft_config::WorkflowStepDef;
use weft_tool::ToolInputs;
use weft_workflow::ExecutionLogEntry;

use super::Scope;
use crate::error::OrchestratorError;
use crate::pool::WorkerPool;

impl Scope {
  /// Run `map_step` once per item, then `reduce_step` over the results.
  ///
  /// Each map task runs as step `<map_id>_item_<i>` with `item` and
  /// `index` added to its inputs, logged and stored like any other step. The reduce step gets `map_results` and
  /// `map_errors`, index-aligned with the items (`null` where not
  /// applicable). Fails without reducing when every item failed. The reduce
  /// output is stored under `map_reduce.result`.
  pub(crate) async fn map_reduce(
    &self,
    map_step: &WorkflowStepDef,
    items: Vec<Value>,
    reduce_step: &WorkflowStepDef,
    cancel: &CancellationToken,
  ) -> Result<Value, OrchestratorError> {
    let pool = WorkerPool::new(self.map_concurrency)?;
    let total = items.len();

    info!(
      execution_id = %self.execution.id(),
      step_id = %map_step.id,
      items = total,
      "map_started"
    );

    let tasks = items.into_iter().enumerate().map(|(index, item)| {
      let mut step = map_step.clone();
      step.id = item_step_id(map_step, index);
      let scope = self.clone();
      let cancel = cancel.clone();
      async move {
        let mut extra = ToolInputs::new();
        extra.insert("item".to_string(), item);
        extra.insert("index".to_string(), json!(index));
        scope.run_step(&step, Some(extra), &cancel).await
      }
    });
    let results = pool.run(tasks).await;

    let mut map_results = Vec::with_capacity(total);
    let mut map_errors = Vec::with_capacity(total);
    let mut failed = 0;

    for (index, joined) in results.into_iter().enumerate() {
      let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          self.record_step_error(&item_step_id(map_step, index), &e);
          Err(e)
        }
      };
      match outcome {
        Ok(value) => {
          map_results.push(value);
          map_errors.push(Value::Null);
        }
        Err(e) => {
          failed += 1;
          self.record(
            ExecutionLogEntry::error(format!("Map failed for item {}", index)).with_data(json!({
              "step_id": item_step_id(map_step, index),
              "index": index,
              "error": e.to_string(),
            })),
          );
          map_results.push(Value::Null);
          map_errors.push(json!(e.to_string()));
        }
      }
    }

    if total > 0 && failed == total {
      return Err(OrchestratorError::MapAllFailed { count: total });
    }

    let mut extra = ToolInputs::new();
    extra.insert("map_results".to_string(), Value::Array(map_results));
    extra.insert("map_errors".to_string(), Value::Array(map_errors));

    let result = self
      .run_step(reduce_step, Some(extra), cancel)
      .await
      .map_err(|e| OrchestratorError::ReduceFailed {
        source: Box::new(e),
      })?;

    self
      .execution
      .context()
      .set("map_reduce.result", result.clone())?;
    Ok(result)
  }
}

fn item_step_id(map_step: &WorkflowStepDef, index: usize) -> String {
  format!("{}_item_{}", map_step.id, index)
}
