//! Integration tests for weft-orchestrator using closure-backed tools.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use weft_config::{LoopConfig, SagaTransaction, StepCondition, WorkflowDefinition, WorkflowStepDef};
use weft_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
use weft_tool::{
  EchoTool, FailTool, FnTool, InMemoryToolRegistry, SleepTool, SumTool, Tool, ToolError,
  ToolInputs,
};
use weft_workflow::{ExecutionState, Finding, FindingSeverity, FindingType, LogLevel, StepStatus};

type Calls = Arc<Mutex<Vec<String>>>;

fn definition(value: Value) -> WorkflowDefinition {
  serde_json::from_value(value).expect("valid definition")
}

fn empty_definition() -> WorkflowDefinition {
  definition(json!({ "id": "wf", "name": "wf", "steps": [] }))
}

/// Registry with `record` (pushes its `label` input onto `calls`), plus the
/// built-in echo, fail, sleep and sum tools.
fn recording_registry(calls: &Calls) -> InMemoryToolRegistry {
  let calls = calls.clone();
  InMemoryToolRegistry::new()
    .with(FnTool::new("record", move |inputs: ToolInputs| {
      let calls = calls.clone();
      async move {
        let label = inputs
          .get("label")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string();
        calls.lock().push(label.clone());
        Ok(json!(label))
      }
    }))
    .with(EchoTool)
    .with(FailTool)
    .with(SleepTool)
    .with(SumTool)
}

fn setup(registry: InMemoryToolRegistry) -> (Arc<Orchestrator>, String) {
  setup_with_inputs(registry, Map::new())
}

fn setup_with_inputs(
  registry: InMemoryToolRegistry,
  inputs: Map<String, Value>,
) -> (Arc<Orchestrator>, String) {
  let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry)));
  let id = orchestrator
    .create_execution(empty_definition(), inputs)
    .expect("execution created");
  (orchestrator, id)
}

fn record(id: &str) -> WorkflowStepDef {
  WorkflowStepDef::new(id, "record").with_input("label", id)
}

fn fail(id: &str) -> WorkflowStepDef {
  WorkflowStepDef::new(id, "fail").with_input("message", format!("{} failed", id))
}

fn recorded(calls: &Calls) -> Vec<String> {
  calls.lock().clone()
}

// --- Sequential ---

#[tokio::test]
async fn test_sequential_runs_in_order_and_logs_each_step() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  orchestrator
    .execute_sequential(
      &id,
      &[record("a"), record("b"), record("c")],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(recorded(&calls), ["a", "b", "c"]);

  let execution = orchestrator.execution(&id).unwrap();
  let completed: Vec<_> = execution
    .log()
    .entries()
    .into_iter()
    .filter(|e| e.status == Some(StepStatus::Completed))
    .collect();
  let order: Vec<_> = completed.iter().filter_map(|e| e.step_id.clone()).collect();
  assert_eq!(order, ["a", "b", "c"]);
  assert!(completed.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

  assert_eq!(execution.context().get("b.output"), Some(json!("b")));
  assert_eq!(execution.state(), ExecutionState::Running);
}

#[tokio::test]
async fn test_sequential_aborts_on_failure() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let err = orchestrator
    .execute_sequential(
      &id,
      &[record("a"), fail("b"), record("c")],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  match err {
    OrchestratorError::StepFailed { step_id, source } => {
      assert_eq!(step_id, "b");
      assert!(matches!(*source, OrchestratorError::ToolExecution { .. }));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(recorded(&calls), ["a"]);

  let errors = orchestrator.execution(&id).unwrap().log().entries_for_step("b");
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].level, LogLevel::Error);
}

#[tokio::test]
async fn test_sequential_continue_on_fail_absorbs_tool_errors() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  orchestrator
    .execute_sequential(
      &id,
      &[record("a"), fail("b").continue_on_fail(), record("c")],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(recorded(&calls), ["a", "c"]);
}

#[tokio::test]
async fn test_resolution_failure_is_fatal_even_with_continue_on_fail() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let unresolvable = WorkflowStepDef::new("b", "record")
    .with_input("label", "${context.missing}")
    .continue_on_fail();

  let err = orchestrator
    .execute_sequential(
      &id,
      &[unresolvable, record("c")],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  match err {
    OrchestratorError::StepFailed { source, .. } => match *source {
      OrchestratorError::Resolution { source, .. } => {
        assert_eq!(source.missing_key(), Some("missing"));
      }
      other => panic!("unexpected cause: {other}"),
    },
    other => panic!("unexpected error: {other}"),
  }
  assert!(recorded(&calls).is_empty());
}

#[tokio::test]
async fn test_unmet_conditions_and_dependencies_skip_steps() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let gated = record("gated").with_condition(StepCondition::new(
    "${context.flag}",
    "exists",
    Value::Null,
  ));
  let dependent = record("dependent").with_dependency("broken");

  orchestrator
    .execute_sequential(
      &id,
      &[gated, fail("broken").continue_on_fail(), dependent, record("last").with_dependency("gated")],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(recorded(&calls).is_empty());

  let execution = orchestrator.execution(&id).unwrap();
  for step_id in ["gated", "dependent", "last"] {
    let entries = execution.log().entries_for_step(step_id);
    assert_eq!(entries.len(), 1, "{step_id}");
    assert_eq!(entries[0].status, Some(StepStatus::Skipped));
  }
}

// --- Reference resolution ---

#[tokio::test]
async fn test_references_resolve_to_typed_values() {
  let calls = Calls::default();
  let mut inputs = Map::new();
  inputs.insert("x".to_string(), json!(5));
  let (orchestrator, id) = setup_with_inputs(recording_registry(&calls), inputs);

  let output = orchestrator
    .execute_step(
      &id,
      &WorkflowStepDef::new("echo", "echo")
        .with_input("value", "${context.x}")
        .with_input("nested", json!({ "list": ["${context.x}", "plain"] })),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(output["value"], json!(5));
  assert!(output["value"].is_i64());
  assert_eq!(output["nested"], json!({ "list": [5, "plain"] }));

  // Path references walk into stored step outputs.
  let chained = orchestrator
    .execute_step(
      &id,
      &WorkflowStepDef::new("chained", "echo").with_input("v", "${context.echo.output.nested.list.0}"),
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(chained, json!({ "v": 5 }));
}

// --- Parallel ---

#[tokio::test]
async fn test_parallel_respects_max_concurrent() {
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let (tracked_running, tracked_peak) = (running.clone(), peak.clone());
  let registry = InMemoryToolRegistry::new().with(FnTool::new("track", move |_| {
    let running = tracked_running.clone();
    let peak = tracked_peak.clone();
    async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok(json!(now))
    }
  }));
  let (orchestrator, id) = setup(registry);

  let steps: Vec<_> = (0..6)
    .map(|i| WorkflowStepDef::new(format!("p{i}"), "track"))
    .collect();

  orchestrator
    .execute_parallel(&id, &steps, 2, CancellationToken::new())
    .await
    .unwrap();

  assert!(peak.load(Ordering::SeqCst) <= 2);
  assert!(peak.load(Ordering::SeqCst) >= 1);

  let execution = orchestrator.execution(&id).unwrap();
  for i in 0..6 {
    assert!(execution.context().contains(&format!("p{i}.output")));
  }
}

#[tokio::test]
async fn test_parallel_failure_does_not_cancel_siblings() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let slow = WorkflowStepDef::new("slow", "sleep").with_input("ms", 30);
  let err = orchestrator
    .execute_parallel(
      &id,
      &[fail("fast"), slow, record("quick")],
      3,
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  match err {
    OrchestratorError::ParallelFailed { failed, total, .. } => {
      assert_eq!(failed, ["fast"]);
      assert_eq!(total, 3);
    }
    other => panic!("unexpected error: {other}"),
  }

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(
    execution.context().get("slow.output"),
    Some(json!({ "slept_ms": 30 }))
  );
  assert_eq!(recorded(&calls), ["quick"]);
  assert_eq!(execution.log().entries_for_step("fast").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_step_timeout_fails_only_that_step() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let stuck = WorkflowStepDef::new("stuck", "sleep")
    .with_input("ms", 10_000)
    .with_timeout_ms(50);
  let steady = WorkflowStepDef::new("steady", "sleep").with_input("ms", 200);
  let err = orchestrator
    .execute_parallel(
      &id,
      &[stuck, steady, record("quick")],
      3,
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  match err {
    OrchestratorError::ParallelFailed { failed, source, .. } => {
      assert_eq!(failed, ["stuck"]);
      assert!(matches!(*source, OrchestratorError::Timeout { timeout_ms: 50, .. }));
    }
    other => panic!("unexpected error: {other}"),
  }

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(
    execution.context().get("steady.output"),
    Some(json!({ "slept_ms": 200 }))
  );
  assert!(execution.log().has_completed("steady"));
  assert_eq!(recorded(&calls), ["quick"]);
}

#[tokio::test]
async fn test_parallel_rejects_zero_bound() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let err = orchestrator
    .execute_parallel(&id, &[record("a")], 0, CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::InvalidConfig { .. }));
}

// --- Conditional ---

#[tokio::test]
async fn test_conditional_coerces_numeric_strings_and_logs_decision_first() {
  let calls = Calls::default();
  let mut inputs = Map::new();
  inputs.insert("x".to_string(), json!(5));
  let (orchestrator, id) = setup_with_inputs(recording_registry(&calls), inputs);

  let took_true = orchestrator
    .execute_conditional(
      &id,
      &StepCondition::new("${context.x}", "greater_than", "3"),
      &[record("yes")],
      &[record("no")],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(took_true);
  assert_eq!(recorded(&calls), ["yes"]);

  let entries = orchestrator.execution(&id).unwrap().log().entries();
  let decision = entries
    .iter()
    .position(|e| e.status == Some(StepStatus::Decision))
    .unwrap();
  let branch = entries
    .iter()
    .position(|e| e.step_id.as_deref() == Some("yes"))
    .unwrap();
  assert!(decision < branch);
}

#[tokio::test]
async fn test_conditional_false_branch_and_operator_errors() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let took_true = orchestrator
    .execute_conditional(
      &id,
      &StepCondition::new("hello world", "contains", "planet"),
      &[record("yes")],
      &[record("no")],
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert!(!took_true);
  assert_eq!(recorded(&calls), ["no"]);

  let err = orchestrator
    .execute_conditional(
      &id,
      &StepCondition::new(1, "roughly", 2),
      &[],
      &[],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::ConditionEvaluation { .. }));

  let err = orchestrator
    .execute_conditional(
      &id,
      &StepCondition::new("abc", "less_than", 2),
      &[],
      &[],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::ConditionEvaluation { .. }));
}

// --- Loop ---

#[tokio::test]
async fn test_loop_runs_max_iterations_with_namespaces() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let iterations = orchestrator
    .execute_loop(
      &id,
      &[record("body")],
      &LoopConfig::with_max_iterations(5),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(iterations, 5);
  assert_eq!(recorded(&calls).len(), 5);

  let context = orchestrator.execution(&id).unwrap().context().snapshot();
  let namespaces: Vec<_> = context
    .keys()
    .filter(|k| k.starts_with("loop.iteration_"))
    .cloned()
    .collect();
  assert_eq!(namespaces.len(), 5);
  for i in 0..5 {
    assert_eq!(
      context.get(&format!("loop.iteration_{i}.index")),
      Some(&json!(i))
    );
  }
}

#[tokio::test]
async fn test_loop_exit_condition() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let config = LoopConfig {
    exit_condition: Some(StepCondition::new(
      "${context.loop.iteration_2.index}",
      "exists",
      Value::Null,
    )),
    ..LoopConfig::with_max_iterations(10)
  };

  let iterations = orchestrator
    .execute_loop(&id, &[record("body")], &config, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(iterations, 3);
}

#[tokio::test]
async fn test_loop_error_handling() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let err = orchestrator
    .execute_loop(
      &id,
      &[fail("body")],
      &LoopConfig::with_max_iterations(3),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    OrchestratorError::LoopIteration { iteration: 0, .. }
  ));

  let config = LoopConfig {
    continue_on_error: true,
    ..LoopConfig::with_max_iterations(3)
  };
  let iterations = orchestrator
    .execute_loop(&id, &[fail("body")], &config, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(iterations, 3);

  let err = orchestrator
    .execute_loop(
      &id,
      &[record("body")],
      &LoopConfig::with_max_iterations(0),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_loop_delay_observes_cancellation() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));
  let cancel = CancellationToken::new();

  let handle = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    let cancel = cancel.clone();
    async move {
      let config = LoopConfig {
        delay_between_ms: 60_000,
        ..LoopConfig::with_max_iterations(3)
      };
      orchestrator
        .execute_loop(&id, &[record("body")], &config, cancel)
        .await
    }
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  cancel.cancel();

  let result = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("loop stopped promptly")
    .unwrap();
  assert!(matches!(result, Err(OrchestratorError::Cancelled)));
  assert_eq!(recorded(&calls), ["body"]);
}

// --- Map-Reduce ---

fn triple_tool() -> impl Tool {
  FnTool::new("triple", |inputs: ToolInputs| async move {
    inputs
      .get("item")
      .and_then(Value::as_i64)
      .map(|n| json!(n * 3))
      .ok_or_else(|| ToolError::invalid_input("item", "expected an integer"))
  })
}

#[tokio::test]
async fn test_map_reduce_triples_then_sums() {
  let received = Arc::new(Mutex::new(Value::Null));
  let capture = received.clone();
  let registry = InMemoryToolRegistry::new()
    .with(triple_tool())
    .with(FnTool::new("total", move |inputs: ToolInputs| {
      let capture = capture.clone();
      async move {
        let results = inputs.get("map_results").cloned().unwrap_or_default();
        *capture.lock() = results.clone();
        let sum: i64 = results
          .as_array()
          .map(|items| items.iter().filter_map(Value::as_i64).sum())
          .unwrap_or_default();
        Ok(json!(sum))
      }
    }));
  let (orchestrator, id) = setup(registry);

  let result = orchestrator
    .execute_map_reduce(
      &id,
      &WorkflowStepDef::new("map", "triple"),
      &WorkflowStepDef::new("reduce", "total"),
      vec![json!(1), json!(2), json!(3)],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(result, json!(18));
  assert_eq!(*received.lock(), json!([3, 6, 9]));

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.context().get("map_reduce.result"), Some(json!(18)));
  for (index, tripled) in [3, 6, 9].into_iter().enumerate() {
    let step_id = format!("map_item_{index}");
    assert!(execution.log().has_completed(&step_id));
    assert_eq!(
      execution.context().get(&format!("{step_id}.output")),
      Some(json!(tripled))
    );
  }
  assert!(execution.log().has_completed("reduce"));
}

#[tokio::test]
async fn test_map_reduce_partial_failure_reduces_survivors() {
  let registry = InMemoryToolRegistry::new().with(triple_tool()).with(SumTool);
  let (orchestrator, id) = setup(registry);

  let result = orchestrator
    .execute_map_reduce(
      &id,
      &WorkflowStepDef::new("map", "triple"),
      &WorkflowStepDef::new("reduce", "sum"),
      vec![json!(1), json!("x"), json!(3)],
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(result, json!(12));

  let execution = orchestrator.execution(&id).unwrap();
  let failures = execution.log().entries_for_step("map_item_1");
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].status, Some(StepStatus::Error));
  assert!(execution.log().has_completed("map_item_0"));
  assert!(execution.log().has_completed("map_item_2"));
  assert!(
    execution
      .log()
      .entries()
      .iter()
      .any(|e| e.message == "Map failed for item 1" && e.level == LogLevel::Error)
  );
}

#[tokio::test]
async fn test_map_concurrency_from_config_bounds_map_phase() {
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let (tracked_running, tracked_peak) = (running.clone(), peak.clone());
  let registry = InMemoryToolRegistry::new()
    .with(SumTool)
    .with(FnTool::new("track", move |inputs: ToolInputs| {
      let running = tracked_running.clone();
      let peak = tracked_peak.clone();
      async move {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        running.fetch_sub(1, Ordering::SeqCst);
        Ok(inputs.get("item").cloned().unwrap_or_default())
      }
    }));
  let config = OrchestratorConfig {
    map_concurrency: Some(2),
    ..Default::default()
  };
  let orchestrator = Orchestrator::with_config(Arc::new(registry), config).unwrap();
  let id = orchestrator
    .create_execution(empty_definition(), Map::new())
    .unwrap();

  let result = orchestrator
    .execute_map_reduce(
      &id,
      &WorkflowStepDef::new("map", "track"),
      &WorkflowStepDef::new("reduce", "sum"),
      (1..=6).map(|n| json!(n)).collect(),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(result, json!(21));
  assert!(peak.load(Ordering::SeqCst) <= 2);
  assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_map_reduce_all_items_fail_skips_reduce() {
  let reduce_calls = Arc::new(AtomicUsize::new(0));
  let counter = reduce_calls.clone();
  let registry = InMemoryToolRegistry::new()
    .with(FailTool)
    .with(FnTool::new("reduce", move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Ok(Value::Null) }
    }));
  let (orchestrator, id) = setup(registry);

  let err = orchestrator
    .execute_map_reduce(
      &id,
      &WorkflowStepDef::new("map", "fail"),
      &WorkflowStepDef::new("reduce", "reduce"),
      vec![json!("x")],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  assert!(matches!(err, OrchestratorError::MapAllFailed { count: 1 }));
  assert_eq!(reduce_calls.load(Ordering::SeqCst), 0);
}

// --- Saga ---

fn transaction(name: &str, action: WorkflowStepDef, undo: Option<&str>) -> SagaTransaction {
  let transaction = SagaTransaction::new(name, action);
  match undo {
    Some(undo) => transaction.with_compensation(record(undo)),
    None => transaction,
  }
}

#[tokio::test]
async fn test_saga_compensates_completed_transactions_in_reverse() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let err = orchestrator
    .execute_saga(
      &id,
      &[
        transaction("A", record("a"), Some("undo_a")),
        transaction("B", record("b"), Some("undo_b")),
        transaction("C", fail("c"), Some("undo_c")),
      ],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    OrchestratorError::SagaFailed { ref transaction, .. } if transaction == "C"
  ));
  assert_eq!(recorded(&calls), ["a", "b", "undo_b", "undo_a"]);

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.context().get("saga.A.result"), Some(json!("a")));
  assert!(!execution.context().contains("saga.C.result"));
  assert!(
    execution
      .log()
      .entries()
      .iter()
      .any(|e| e.message == "Starting saga rollback")
  );
}

#[tokio::test]
async fn test_saga_rollback_is_best_effort() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let err = orchestrator
    .execute_saga(
      &id,
      &[
        transaction("A", record("a"), Some("undo_a")),
        SagaTransaction::new("B", record("b")).with_compensation(fail("undo_b")),
        transaction("C", record("c"), None),
        transaction("D", fail("d"), None),
      ],
      CancellationToken::new(),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, OrchestratorError::SagaFailed { .. }));

  // C has no compensation, B's compensation fails, A is still undone.
  assert_eq!(recorded(&calls), ["a", "b", "c", "undo_a"]);

  let entries = orchestrator.execution(&id).unwrap().log().entries();
  assert!(entries.iter().any(|e| e.level == LogLevel::Warning
    && e.message == "No compensation defined for transaction: C"));
  assert!(entries.iter().any(|e| e.level == LogLevel::Error
    && e.message.starts_with("compensation for transaction 'B' failed")));
}

#[tokio::test]
async fn test_cancelling_execution_mid_saga_still_compensates() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  let handle = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    async move {
      let transactions = [
        transaction("A", record("a"), Some("undo_a")),
        transaction(
          "B",
          WorkflowStepDef::new("b", "sleep").with_input("ms", 5_000),
          None,
        ),
      ];
      orchestrator
        .execute_saga(&id, &transactions, CancellationToken::new())
        .await
    }
  });

  tokio::time::sleep(Duration::from_millis(100)).await;
  orchestrator.cancel(&id).unwrap();

  let err = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("saga stopped promptly")
    .unwrap()
    .unwrap_err();
  assert!(matches!(
    err,
    OrchestratorError::SagaFailed { ref transaction, .. } if transaction == "B"
  ));
  assert!(err.is_cancellation());
  assert_eq!(recorded(&calls), ["a", "undo_a"]);

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.state(), ExecutionState::Cancelled);
  assert!(execution.log().has_completed("undo_a"));
  assert_eq!(execution.context().get("undo_a.output"), Some(json!("undo_a")));

  let messages: Vec<_> = execution
    .log()
    .entries()
    .into_iter()
    .map(|e| e.message)
    .collect();
  assert!(messages.iter().any(|m| m == "Starting saga rollback"));
  assert!(messages.iter().any(|m| m == "Executing compensation for: A"));

  // Sealed once the rollback has been recorded.
  assert!(execution.context().set("late", json!(1)).is_err());
}

#[tokio::test]
async fn test_saga_success_stores_results() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));

  orchestrator
    .execute_saga(
      &id,
      &[
        transaction("A", record("a"), Some("undo_a")),
        transaction("B", record("b"), None),
      ],
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(recorded(&calls), ["a", "b"]);
  let context = orchestrator.execution(&id).unwrap().context().snapshot();
  assert_eq!(context.get("saga.B.result"), Some(&json!("b")));
}

// --- Findings ---

#[tokio::test]
async fn test_findings_read_is_stable() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));
  let execution = orchestrator.execution(&id).unwrap();

  let first = execution
    .context()
    .add_finding(Finding::new(
      FindingType::Anomaly,
      FindingSeverity::High,
      "latency spike",
    ))
    .unwrap();
  let second = execution
    .context()
    .add_finding(
      Finding::new(FindingType::RootCause, FindingSeverity::Critical, "bad deploy")
        .with_related(first.clone()),
    )
    .unwrap();
  assert_ne!(first, second);

  let a = serde_json::to_value(execution.context().findings()).unwrap();
  let b = serde_json::to_value(execution.context().findings()).unwrap();
  assert_eq!(a, b);
  assert_eq!(a.as_array().map(Vec::len), Some(2));
}

// --- Lifecycle ---

#[tokio::test]
async fn test_paused_execution_waits_at_step_boundary() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));
  orchestrator.start(&id).unwrap();
  orchestrator.pause(&id).unwrap();

  let handle = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    async move {
      let steps = vec![record("a")];
      orchestrator
        .execute_sequential(&id, &steps, CancellationToken::new())
        .await
    }
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(recorded(&calls).is_empty());

  orchestrator.resume(&id).unwrap();
  handle.await.unwrap().unwrap();
  assert_eq!(recorded(&calls), ["a"]);
}

#[tokio::test]
async fn test_cancelling_paused_execution_releases_waiters() {
  let calls = Calls::default();
  let (orchestrator, id) = setup(recording_registry(&calls));
  orchestrator.start(&id).unwrap();
  orchestrator.pause(&id).unwrap();

  let handle = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    async move {
      let steps = vec![record("a")];
      orchestrator
        .execute_sequential(&id, &steps, CancellationToken::new())
        .await
    }
  });

  tokio::time::sleep(Duration::from_millis(20)).await;
  orchestrator.cancel(&id).unwrap();

  let result = handle.await.unwrap();
  assert!(matches!(result, Err(OrchestratorError::Cancelled)));
  assert!(recorded(&calls).is_empty());
  assert_eq!(
    orchestrator.execution(&id).unwrap().state(),
    ExecutionState::Cancelled
  );
}

// --- Whole-definition run ---

fn run_definition(strategy: &str, max_errors: u32, steps: Value) -> WorkflowDefinition {
  definition(json!({
    "id": "wf",
    "name": "wf",
    "inputs": [{ "name": "region", "type": "string", "default": "eu" }],
    "steps": steps,
    "outputs": [
      { "name": "first", "source": "a.output" },
      { "name": "region", "source": "${context.greet.output.region}" }
    ],
    "error_policy": { "strategy": strategy, "max_errors": max_errors }
  }))
}

fn record_json(id: &str) -> Value {
  json!({ "id": id, "tool": "record", "inputs": { "label": id } })
}

fn fail_json(id: &str) -> Value {
  json!({ "id": id, "tool": "fail", "inputs": { "message": format!("{} failed", id) } })
}

#[tokio::test]
async fn test_run_fail_fast_completes_and_collects_outputs() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));
  let definition = run_definition(
    "fail_fast",
    0,
    json!([
      record_json("a"),
      { "id": "greet", "tool": "echo", "inputs": { "region": "${context.region}" } },
    ]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  let outputs = orchestrator.run(&id, CancellationToken::new()).await.unwrap();
  assert_eq!(outputs.get("first"), Some(&json!("a")));
  assert_eq!(outputs.get("region"), Some(&json!("eu")));

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.state(), ExecutionState::Completed);
  assert!(execution.ended_at().is_some());
  assert!(execution.context().set("late", json!(1)).is_err());

  let err = orchestrator.run(&id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Terminal { .. }));
}

#[tokio::test]
async fn test_run_fail_fast_fails_execution() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));
  let definition = run_definition(
    "fail_fast",
    0,
    json!([record_json("a"), fail_json("b"), record_json("c")]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  let err = orchestrator.run(&id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::StepFailed { ref step_id, .. } if step_id == "b"));
  assert_eq!(recorded(&calls), ["a"]);

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.state(), ExecutionState::Failed);
  assert!(execution.error().is_some_and(|e| e.contains("b failed")));
  let last = execution.log().entries().pop().unwrap();
  assert_eq!(last.level, LogLevel::Error);
  assert!(last.message.starts_with("Workflow failed"));
}

#[tokio::test]
async fn test_run_continue_strategy_and_error_limit() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));

  let steps = json!([record_json("a"), fail_json("b"), fail_json("c"), record_json("d")]);

  let unlimited = orchestrator
    .create_execution(run_definition("continue", 0, steps.clone()), Map::new())
    .unwrap();
  orchestrator
    .run(&unlimited, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(recorded(&calls), ["a", "d"]);
  assert_eq!(
    orchestrator.execution(&unlimited).unwrap().state(),
    ExecutionState::Completed
  );

  let limited = orchestrator
    .create_execution(run_definition("continue", 1, steps), Map::new())
    .unwrap();
  let err = orchestrator
    .run(&limited, CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    OrchestratorError::ErrorLimitExceeded {
      failures: 2,
      max_errors: 1
    }
  ));
  assert_eq!(
    orchestrator.execution(&limited).unwrap().state(),
    ExecutionState::Failed
  );
}

#[tokio::test]
async fn test_run_compensate_strategy_uses_fallback_steps() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));
  let definition = run_definition(
    "compensate",
    0,
    json!([
      {
        "id": "reserve",
        "tool": "record",
        "inputs": { "label": "reserve" },
        "error_handling": { "fallback_step": "release" }
      },
      fail_json("charge"),
      record_json("release"),
    ]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  let err = orchestrator.run(&id, CancellationToken::new()).await.unwrap_err();
  assert!(matches!(
    err,
    OrchestratorError::SagaFailed { ref transaction, .. } if transaction == "charge"
  ));
  assert_eq!(recorded(&calls), ["reserve", "release"]);
  assert_eq!(
    orchestrator.execution(&id).unwrap().state(),
    ExecutionState::Failed
  );
}

#[tokio::test]
async fn test_run_groups_parallel_steps() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));
  let definition = run_definition(
    "fail_fast",
    0,
    json!([
      record_json("a"),
      { "id": "p1", "type": "parallel", "tool": "record", "inputs": { "label": "p1" } },
      { "id": "p2", "type": "parallel", "tool": "record", "inputs": { "label": "p2" } },
      { "id": "z", "tool": "record", "inputs": { "label": "z" }, "depends_on": ["p1", "p2"] },
    ]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  orchestrator.run(&id, CancellationToken::new()).await.unwrap();

  let calls = recorded(&calls);
  assert_eq!(calls.len(), 4);
  assert_eq!(calls[0], "a");
  assert_eq!(calls[3], "z");
  assert_eq!(orchestrator.execution(&id).unwrap().current_step(), 3);
}

#[tokio::test]
async fn test_run_continue_skips_parallel_step_with_failed_dependency() {
  let calls = Calls::default();
  let orchestrator = Orchestrator::new(Arc::new(recording_registry(&calls)));
  let definition = run_definition(
    "continue",
    0,
    json!([
      fail_json("fetch"),
      {
        "id": "p1",
        "type": "parallel",
        "tool": "record",
        "inputs": { "label": "p1" },
        "depends_on": ["fetch"]
      },
      { "id": "p2", "type": "parallel", "tool": "record", "inputs": { "label": "p2" } },
    ]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  orchestrator.run(&id, CancellationToken::new()).await.unwrap();
  assert_eq!(recorded(&calls), ["p2"]);

  let execution = orchestrator.execution(&id).unwrap();
  assert_eq!(execution.state(), ExecutionState::Completed);
  let skipped = execution.log().entries_for_step("p1");
  assert_eq!(skipped.len(), 1);
  assert_eq!(skipped[0].status, Some(StepStatus::Skipped));
  assert!(!execution.context().contains("p1.output"));
}

#[tokio::test]
async fn test_cancel_stops_running_execution() {
  let calls = Calls::default();
  let orchestrator = Arc::new(Orchestrator::new(Arc::new(recording_registry(&calls))));
  let definition = run_definition(
    "fail_fast",
    0,
    json!([
      { "id": "wait", "tool": "sleep", "inputs": { "ms": 60_000 } },
      record_json("after"),
    ]),
  );
  let id = orchestrator.create_execution(definition, Map::new()).unwrap();

  let handle = tokio::spawn({
    let orchestrator = orchestrator.clone();
    let id = id.clone();
    async move { orchestrator.run(&id, CancellationToken::new()).await }
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  orchestrator.cancel(&id).unwrap();

  let err = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("run stopped promptly")
    .unwrap()
    .unwrap_err();
  assert!(err.is_cancellation());
  assert!(recorded(&calls).is_empty());
  assert_eq!(
    orchestrator.execution(&id).unwrap().state(),
    ExecutionState::Cancelled
  );
}
