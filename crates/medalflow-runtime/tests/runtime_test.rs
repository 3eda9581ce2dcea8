//! End-to-end runtime tests over the medal count pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medalflow_config::{PipelineConfig, StoreConfig};
use medalflow_runtime::{
  CategoryPicker, ChannelNotifier, ExecutionEvent, Runtime, RuntimeConfig, RuntimeError,
  TaskError, TaskState, TokioClock,
};
use medalflow_store::{
  Error as StoreError, MemoryStore, NewRunRecord, RunRecord, SqliteStore, Store,
};
use medalflow_workflow::{CategorySet, Workflow, node_ids};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const HANDLERS: [&str; 3] = ["calc_Bronze", "calc_Silver", "calc_Gold"];

fn medal_store() -> Arc<MemoryStore> {
  let store = Arc::new(MemoryStore::new());
  store.add_source_rows("Gold", 7);
  store.add_source_rows("Silver", 5);
  store.add_source_rows("Bronze", 3);
  store
}

/// A seed under which the first pick is `label`.
fn seed_picking(label: &str) -> u64 {
  let set = CategorySet::new(PipelineConfig::default().categories).unwrap();
  (0..1_000)
    .find(|seed| CategoryPicker::seeded(set.clone(), *seed).pick().label() == label)
    .expect("no seed picks the label")
}

fn picked(result: &medalflow_runtime::InvokeResult) -> String {
  result.output(node_ids::PICK_CATEGORY).unwrap()["category"]
    .as_str()
    .unwrap()
    .to_string()
}

/// Fails `count_source` for the first `failures` calls.
struct FlakyStore {
  inner: MemoryStore,
  failures: u32,
  calls: AtomicU32,
}

impl FlakyStore {
  fn new(failures: u32) -> Self {
    let inner = MemoryStore::new();
    inner.add_source_rows("Gold", 7);
    inner.add_source_rows("Silver", 5);
    inner.add_source_rows("Bronze", 3);
    Self {
      inner,
      failures,
      calls: AtomicU32::new(0),
    }
  }
}

#[async_trait]
impl Store for FlakyStore {
  async fn ensure_schema(&self) -> Result<(), StoreError> {
    self.inner.ensure_schema().await
  }

  async fn count_source(&self, category: &str) -> Result<i64, StoreError> {
    if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
      return Err(StoreError::InvalidRecord("connection reset".to_string()));
    }
    self.inner.count_source(category).await
  }

  async fn append_record(&self, record: &NewRunRecord) -> Result<RunRecord, StoreError> {
    self.inner.append_record(record).await
  }

  async fn latest_record_since(
    &self,
    cutoff: DateTime<Utc>,
  ) -> Result<Option<RunRecord>, StoreError> {
    self.inner.latest_record_since(cutoff).await
  }

  async fn list_records(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
    self.inner.list_records(limit).await
  }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_gold() {
  let store = medal_store();
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let config = RuntimeConfig {
    seed: Some(seed_picking("Gold")),
  };
  let runtime = Runtime::new(workflow, store.clone(), config)
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let result = runtime.invoke(CancellationToken::new()).await.unwrap();

  assert_eq!(picked(&result), "Gold");
  assert_eq!(result.state("calc_Gold"), Some(TaskState::Succeeded));
  assert_eq!(
    result.nodes_in_state(TaskState::Skipped),
    vec!["calc_Bronze", "calc_Silver"]
  );

  let records = store.records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].category, "Gold");
  assert_eq!(records[0].count, 7);

  let verified = result.output(node_ids::VERIFY_RECENT).unwrap();
  assert_eq!(verified["state"], "satisfied");
  assert_eq!(verified["record"]["category"], "Gold");
}

#[tokio::test(start_paused = true)]
async fn test_each_run_executes_exactly_the_picked_handler() {
  let store = medal_store();
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, store.clone(), RuntimeConfig { seed: Some(11) })
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  for _ in 0..20 {
    let result = runtime.invoke(CancellationToken::new()).await.unwrap();
    let category = picked(&result);
    let selected = format!("calc_{}", category);

    let succeeded: Vec<&str> = result
      .nodes_in_state(TaskState::Succeeded)
      .into_iter()
      .filter(|id| id.starts_with("calc_"))
      .collect();
    assert_eq!(succeeded, vec![selected.as_str()]);

    for handler in HANDLERS.iter().filter(|h| **h != selected) {
      assert_eq!(result.state(handler), Some(TaskState::Skipped));
    }
    assert_eq!(
      result.output(node_ids::SELECT_BRANCH).unwrap()["selected"],
      selected
    );
  }

  assert_eq!(store.records().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_gate_runs_after_one_success_and_two_skips() {
  let store = medal_store();
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, store, RuntimeConfig { seed: Some(3) })
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let started = tokio::time::Instant::now();
  let result = runtime.invoke(CancellationToken::new()).await.unwrap();

  assert_eq!(result.state(node_ids::CONVERGE), Some(TaskState::Succeeded));
  assert_eq!(result.nodes_in_state(TaskState::Skipped).len(), 2);
  assert!(started.elapsed() >= Duration::from_secs(1));

  // The gate passes along only the output of the handler that ran
  let merged = result.output(node_ids::CONVERGE).unwrap().as_object().unwrap();
  let selected = format!("calc_{}", picked(&result));
  assert_eq!(merged.keys().collect::<Vec<_>>(), vec![&selected]);
}

#[tokio::test(start_paused = true)]
async fn test_events_describe_the_run() {
  let store = medal_store();
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let runtime = Runtime::with_notifier(workflow, store, RuntimeConfig::default(), notifier)
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let result = runtime.invoke(CancellationToken::new()).await.unwrap();

  let mut received = Vec::new();
  while let Ok(event) = events.try_recv() {
    received.push(event);
  }

  assert!(matches!(
    received.first(),
    Some(ExecutionEvent::WorkflowStarted { .. })
  ));
  assert!(matches!(
    received.last(),
    Some(ExecutionEvent::WorkflowCompleted { execution_id }) if *execution_id == result.execution_id
  ));

  let branches: Vec<&str> = received
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::BranchSelected { category, .. } => Some(category.as_str()),
      _ => None,
    })
    .collect();
  let category = picked(&result);
  assert_eq!(branches, vec![category.as_str()]);

  let skipped = received
    .iter()
    .filter(|e| matches!(e, ExecutionEvent::NodeSkipped { .. }))
    .count();
  assert_eq!(skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_handler_retries_storage_errors() {
  let store = Arc::new(FlakyStore::new(2));
  let mut pipeline = PipelineConfig::default();
  pipeline.retry.handler_retry_attempts = 2;
  let workflow = Workflow::from_config(&pipeline).unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let runtime = Runtime::with_notifier(workflow, store.clone(), RuntimeConfig::default(), notifier)
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let result = runtime.invoke(CancellationToken::new()).await.unwrap();

  let selected = format!("calc_{}", picked(&result));
  let handler = &result.node_results[&selected];
  assert_eq!(handler.state, TaskState::Succeeded);
  assert_eq!(handler.attempts, 3);
  assert_eq!(store.inner.records().len(), 1);

  let mut retries = 0;
  while let Ok(event) = events.try_recv() {
    if let ExecutionEvent::NodeRetrying { node_id, .. } = event {
      assert_eq!(node_id, selected);
      retries += 1;
    }
  }
  assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_handler_failure_fails_run() {
  let store = Arc::new(FlakyStore::new(u32::MAX));
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let runtime = Runtime::with_notifier(workflow, store.clone(), RuntimeConfig::default(), notifier)
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let err = runtime.invoke(CancellationToken::new()).await.unwrap_err();

  match err {
    RuntimeError::TaskFailed { node_id, source } => {
      assert!(node_id.starts_with("calc_"), "unexpected node {}", node_id);
      assert!(matches!(source, TaskError::StorageRead { .. }));
    }
    other => panic!("expected TaskFailed, got {:?}", other),
  }
  assert!(store.inner.records().is_empty());

  let mut upstream_failed = Vec::new();
  let mut failed = false;
  while let Ok(event) = events.try_recv() {
    match event {
      ExecutionEvent::NodeUpstreamFailed { node_id, .. } => upstream_failed.push(node_id),
      ExecutionEvent::WorkflowFailed { .. } => failed = true,
      _ => {}
    }
  }
  assert_eq!(
    upstream_failed,
    vec![node_ids::CONVERGE.to_string(), node_ids::VERIFY_RECENT.to_string()]
  );
  assert!(failed);
}

#[tokio::test(start_paused = true)]
async fn test_verifier_timeout_fails_run() {
  let store = medal_store();
  let mut pipeline = PipelineConfig::default();
  // Anything written before the one second gate is already too old
  pipeline.sensor.recency_window_ms = 1;
  let workflow = Workflow::from_config(&pipeline).unwrap();
  let runtime = Runtime::new(workflow, store.clone(), RuntimeConfig::default())
    .unwrap()
    .with_clock(Arc::new(TokioClock::new()));

  let started = tokio::time::Instant::now();
  let err = runtime.invoke(CancellationToken::new()).await.unwrap_err();

  match err {
    RuntimeError::TaskFailed { node_id, source } => {
      assert_eq!(node_id, node_ids::VERIFY_RECENT);
      match source {
        TaskError::TimedOut { polls, .. } => assert_eq!(polls, 13),
        other => panic!("expected TimedOut, got {:?}", other),
      }
    }
    other => panic!("expected TaskFailed, got {:?}", other),
  }
  assert!(started.elapsed() >= Duration::from_secs(61));
  assert_eq!(store.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_gate() {
  let store = medal_store();
  let mut pipeline = PipelineConfig::default();
  pipeline.gate.settle_delay_ms = 3_600_000;
  let workflow = Workflow::from_config(&pipeline).unwrap();
  let runtime = Runtime::new(workflow, store.clone(), RuntimeConfig::default()).unwrap();
  let cancel = CancellationToken::new();

  let canceller = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(2)).await;
      cancel.cancel();
    })
  };

  let err = runtime.invoke(cancel).await.unwrap_err();
  canceller.await.unwrap();

  assert!(matches!(err, RuntimeError::Cancelled));
  // The handler had already written its record; nothing is rolled back
  assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let store = medal_store();
  let runtime = Runtime::new(workflow, store.clone(), RuntimeConfig::default()).unwrap();
  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = runtime.invoke(cancel).await.unwrap_err();

  assert!(matches!(err, RuntimeError::Cancelled));
  assert!(!store.schema_ready());
}

#[tokio::test]
async fn test_invoke_node_branch() {
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, medal_store(), RuntimeConfig::default()).unwrap();

  let result = runtime
    .invoke_node(
      node_ids::SELECT_BRANCH,
      json!({ "category": "Silver" }),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(result.state, TaskState::Succeeded);
  assert_eq!(result.output["selected"], "calc_Silver");
}

#[tokio::test]
async fn test_invoke_node_branch_unknown_category() {
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, medal_store(), RuntimeConfig::default()).unwrap();

  let err = runtime
    .invoke_node(
      node_ids::SELECT_BRANCH,
      json!({ "category": "Platinum" }),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  match err {
    RuntimeError::TaskFailed { node_id, source } => {
      assert_eq!(node_id, node_ids::SELECT_BRANCH);
      assert!(matches!(source, TaskError::UnknownCategory(label) if label == "Platinum"));
    }
    other => panic!("expected TaskFailed, got {:?}", other),
  }
}

#[tokio::test]
async fn test_invoke_node_handler_appends_record() {
  let store = medal_store();
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, store.clone(), RuntimeConfig::default()).unwrap();

  let result = runtime
    .invoke_node("calc_Bronze", json!({}), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.output["category"], "Bronze");
  assert_eq!(result.output["count"], 3);
  assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn test_invoke_node_unknown_node() {
  let workflow = Workflow::from_config(&PipelineConfig::default()).unwrap();
  let runtime = Runtime::new(workflow, medal_store(), RuntimeConfig::default()).unwrap();

  let err = runtime
    .invoke_node("calc_Platinum", json!({}), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::InvalidGraph { .. }));
}

#[tokio::test]
async fn test_end_to_end_sqlite() {
  let store = SqliteStore::in_memory(&StoreConfig::default()).await.unwrap();
  sqlx::query("CREATE TABLE athlete_event_results (id INTEGER PRIMARY KEY, medal TEXT)")
    .execute(store.pool())
    .await
    .unwrap();
  for medal in ["Gold", "Gold", "Silver", "Bronze", "Gold", "nan", "Silver"] {
    sqlx::query("INSERT INTO athlete_event_results (medal) VALUES (?)")
      .bind(medal)
      .execute(store.pool())
      .await
      .unwrap();
  }
  let store = Arc::new(store);

  let mut pipeline = PipelineConfig::default();
  pipeline.gate.settle_delay_ms = 0;
  let workflow = Workflow::from_config(&pipeline).unwrap();
  let config = RuntimeConfig {
    seed: Some(seed_picking("Gold")),
  };
  let runtime = Runtime::new(workflow, store.clone(), config).unwrap();

  let result = runtime.invoke(CancellationToken::new()).await.unwrap();

  assert_eq!(picked(&result), "Gold");
  let records = store.list_records(10).await.unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].category, "Gold");
  assert_eq!(records[0].count, 3);

  let verified = result.output(node_ids::VERIFY_RECENT).unwrap();
  assert_eq!(verified["state"], "satisfied");
  assert_eq!(verified["polls"], 1);
}
