//! Workflow runtime.
//!
//! The [`Runtime`] struct is the main entry point for executing a locked
//! workflow. It walks the graph in dependency order, applies trigger rules and
//! branch decisions, retries failed nodes and reports every node's terminal
//! state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use medalflow_store::Store;
use medalflow_workflow::{Category, Graph, Node, NodeType, Workflow, select};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{RuntimeError, TaskError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::gate::{ConvergenceGate, Readiness, evaluate};
use crate::handler::CategoryHandler;
use crate::picker::CategoryPicker;
use crate::result::{InvokeResult, NodeResult, TaskState};
use crate::verifier::RecencyVerifier;

/// Handle for a spawned node task.
type NodeHandle = tokio::task::JoinHandle<NodeOutcome>;

/// Configuration for the runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
  /// Seed for the category pickers. `None` seeds from OS entropy.
  pub seed: Option<u64>,
}

/// The workflow runtime.
///
/// Generic over `N: ExecutionNotifier` so callers choose how execution events
/// are observed. Use `Runtime::new()` to discard them, or
/// `Runtime::with_notifier()` to receive them.
pub struct Runtime<N: ExecutionNotifier = NoopNotifier> {
  workflow: Workflow,
  graph: Graph,
  order: Vec<String>,
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
  pickers: HashMap<String, Arc<CategoryPicker>>,
  notifier: Arc<N>,
}

impl Runtime<NoopNotifier> {
  /// Create a runtime that discards execution events.
  pub fn new(
    workflow: Workflow,
    store: Arc<dyn Store>,
    config: RuntimeConfig,
  ) -> Result<Self, RuntimeError> {
    Self::with_notifier(workflow, store, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> Runtime<N> {
  /// Create a runtime that reports execution events to `notifier`.
  ///
  /// Fails if the workflow does not validate.
  pub fn with_notifier(
    workflow: Workflow,
    store: Arc<dyn Store>,
    config: RuntimeConfig,
    notifier: N,
  ) -> Result<Self, RuntimeError> {
    workflow.validate()?;
    let graph = workflow.graph();
    let order = graph.topological_order()?;

    let mut pickers = HashMap::new();
    let mut index = 0u64;
    for node_id in &order {
      if let Some(Node {
        node_type: NodeType::PickCategory { categories },
        ..
      }) = workflow.get_node(node_id)
      {
        let picker = match config.seed {
          Some(seed) => CategoryPicker::seeded(categories.clone(), seed.wrapping_add(index)),
          None => CategoryPicker::new(categories.clone()),
        };
        pickers.insert(node_id.clone(), Arc::new(picker));
        index += 1;
      }
    }

    Ok(Self {
      workflow,
      graph,
      order,
      store,
      clock: Arc::new(SystemClock),
      pickers,
      notifier: Arc::new(notifier),
    })
  }

  /// Replace the wall clock used to stamp and verify run records.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Get a reference to the workflow.
  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  /// Execute the whole workflow.
  ///
  /// Returns once every node is terminal. If any node failed the run fails
  /// with the first failure, after the rest of the graph has been marked
  /// upstream-failed.
  #[instrument(
    name = "runtime_invoke",
    skip(self, cancel),
    fields(workflow_id = %self.workflow.workflow_id)
  )]
  pub async fn invoke(&self, cancel: CancellationToken) -> Result<InvokeResult, RuntimeError> {
    let execution_id = uuid::Uuid::new_v4().to_string();

    info!(execution_id = %execution_id, "workflow_started");
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      workflow_id: self.workflow.workflow_id.clone(),
    });

    let result = self.run_execution_loop(&execution_id, &cancel).await;

    match &result {
      Ok(_) => {
        info!(execution_id = %execution_id, "workflow_completed");
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.clone(),
        });
      }
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "workflow_failed");
        self.notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id: execution_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  /// Execute a single node in isolation.
  ///
  /// The payload stands in for the node's upstream outputs, so a branch node
  /// can be driven with `{"category": "Gold"}`. Trigger rules and branch
  /// skipping do not apply; retries do.
  #[instrument(
    name = "runtime_invoke_node",
    skip(self, payload, cancel),
    fields(workflow_id = %self.workflow.workflow_id, node_id = %node_id)
  )]
  pub async fn invoke_node(
    &self,
    node_id: &str,
    payload: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<NodeResult, RuntimeError> {
    let node = self
      .workflow
      .get_node(node_id)
      .ok_or_else(|| RuntimeError::InvalidGraph {
        message: format!("node '{}' not found in workflow", node_id),
      })?
      .clone();

    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(execution_id = %execution_id, payload = %payload, "invoke_node_started");

    let ctx = self.context(&execution_id, &cancel);
    let picker = self.pickers.get(node_id).cloned();
    let outcome = run_node(ctx, node, payload, picker).await;

    match outcome.error {
      None => {
        info!(output = %outcome.result.output, "invoke_node_completed");
        Ok(outcome.result)
      }
      Some(TaskError::Cancelled) if cancel.is_cancelled() => Err(RuntimeError::Cancelled),
      Some(source) => {
        error!(error = %source, "invoke_node_failed");
        Err(RuntimeError::TaskFailed {
          node_id: node_id.to_string(),
          source,
        })
      }
    }
  }

  /// Run the main execution loop.
  async fn run_execution_loop(
    &self,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<InvokeResult, RuntimeError> {
    let mut completed: HashMap<String, NodeResult> = HashMap::new();
    let mut first_failure: Option<(String, TaskError)> = None;

    loop {
      if cancel.is_cancelled() {
        warn!(execution_id = %execution_id, "workflow cancelled");
        return Err(RuntimeError::Cancelled);
      }

      let ready = self.decide_nodes(&mut completed, execution_id)?;
      if ready.is_empty() {
        break;
      }

      info!(
        execution_id = %execution_id,
        ready_nodes = ?ready,
        "executing batch of ready nodes"
      );

      let handles = self.execute_ready_nodes(&ready, &completed, execution_id, cancel)?;

      let outcomes = tokio::select! {
        outcomes = futures::future::join_all(handles) => outcomes,
        _ = cancel.cancelled() => {
          warn!(execution_id = %execution_id, "workflow cancelled during task execution");
          return Err(RuntimeError::Cancelled);
        }
      };

      for outcome in outcomes {
        let NodeOutcome { result, error } = outcome.map_err(|e| RuntimeError::InvalidGraph {
          message: format!("task join error: {}", e),
        })?;
        let node_id = result.node_id.clone();

        match error {
          None => {
            info!(
              execution_id = %execution_id,
              task_id = %result.task_id,
              node_id = %node_id,
              output = %result.output,
              "task_completed"
            );
            let is_branch = matches!(
              self.workflow.get_node(&node_id).map(|n| &n.node_type),
              Some(NodeType::Branch { .. })
            );
            let output = result.output.clone();
            completed.insert(node_id.clone(), result);
            if is_branch {
              self.apply_branch(&node_id, &output, &mut completed, execution_id)?;
            }
          }
          Some(e) => {
            error!(execution_id = %execution_id, node_id = %node_id, error = %e, "task_failed");
            completed.insert(node_id.clone(), result);
            if first_failure.is_none() {
              first_failure = Some((node_id, e));
            }
          }
        }
      }
    }

    if let Some(missing) = self.order.iter().find(|id| !completed.contains_key(*id)) {
      return Err(RuntimeError::InvalidGraph {
        message: format!("node '{}' never became ready", missing),
      });
    }

    if let Some((node_id, source)) = first_failure {
      return Err(RuntimeError::TaskFailed { node_id, source });
    }

    Ok(InvokeResult {
      execution_id: execution_id.to_string(),
      node_results: completed,
    })
  }

  /// Settle every undecided node whose upstream nodes are all terminal.
  ///
  /// Skipped and upstream-failed nodes are recorded straight away, in
  /// topological order so the decision cascades within one pass. Returns the
  /// nodes that should run now.
  fn decide_nodes(
    &self,
    completed: &mut HashMap<String, NodeResult>,
    execution_id: &str,
  ) -> Result<Vec<String>, RuntimeError> {
    let mut ready = Vec::new();

    for node_id in &self.order {
      if completed.contains_key(node_id) {
        continue;
      }

      let states: Option<Vec<TaskState>> = self
        .graph
        .upstream(node_id)
        .iter()
        .map(|up| completed.get(up).map(|r| r.state))
        .collect();
      let Some(states) = states else {
        continue;
      };

      let node = self.node(node_id)?;
      match evaluate(node.trigger_rule, &states) {
        Readiness::Run => ready.push(node_id.clone()),
        Readiness::Skip => {
          info!(execution_id = %execution_id, node_id = %node_id, "task_skipped");
          self.notifier.notify(ExecutionEvent::NodeSkipped {
            execution_id: execution_id.to_string(),
            node_id: node_id.clone(),
          });
          completed.insert(node_id.clone(), NodeResult::not_run(node_id, TaskState::Skipped));
        }
        Readiness::UpstreamFailed => {
          warn!(execution_id = %execution_id, node_id = %node_id, "task_upstream_failed");
          self.notifier.notify(ExecutionEvent::NodeUpstreamFailed {
            execution_id: execution_id.to_string(),
            node_id: node_id.clone(),
          });
          completed.insert(
            node_id.clone(),
            NodeResult::not_run(node_id, TaskState::UpstreamFailed),
          );
        }
      }
    }

    Ok(ready)
  }

  /// Skip every direct downstream node of a branch except the chosen handler.
  fn apply_branch(
    &self,
    branch_id: &str,
    output: &serde_json::Value,
    completed: &mut HashMap<String, NodeResult>,
    execution_id: &str,
  ) -> Result<(), RuntimeError> {
    let label = output
      .get("category")
      .and_then(serde_json::Value::as_str)
      .unwrap_or_default();
    let handler_id = output
      .get("selected")
      .and_then(serde_json::Value::as_str)
      .unwrap_or_default();

    let downstream = self.graph.downstream(branch_id);
    let selected = downstream
      .iter()
      .find(|id| {
        matches!(
          self.workflow.get_node(id).map(|n| &n.node_type),
          Some(NodeType::Handler { category }) if category.label() == label
        )
      })
      .ok_or_else(|| RuntimeError::InvalidGraph {
        message: format!("branch '{}' has no handler for '{}'", branch_id, label),
      })?;

    info!(
      execution_id = %execution_id,
      node_id = %branch_id,
      category = %label,
      selected = %selected,
      "branch_selected"
    );
    self.notifier.notify(ExecutionEvent::BranchSelected {
      execution_id: execution_id.to_string(),
      node_id: branch_id.to_string(),
      category: label.to_string(),
      handler_id: handler_id.to_string(),
    });

    for node_id in downstream {
      if node_id == selected || completed.contains_key(node_id) {
        continue;
      }
      info!(execution_id = %execution_id, node_id = %node_id, "task_skipped");
      self.notifier.notify(ExecutionEvent::NodeSkipped {
        execution_id: execution_id.to_string(),
        node_id: node_id.clone(),
      });
      completed.insert(node_id.clone(), NodeResult::not_run(node_id, TaskState::Skipped));
    }

    Ok(())
  }

  /// Spawn tasks to execute all ready nodes in parallel.
  fn execute_ready_nodes(
    &self,
    ready: &[String],
    completed: &HashMap<String, NodeResult>,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<NodeHandle>, RuntimeError> {
    let mut handles = Vec::with_capacity(ready.len());

    for node_id in ready {
      let node = self.node(node_id)?.clone();

      // Outputs of succeeded upstream nodes, keyed by node id
      let input = serde_json::Value::Object(
        self
          .graph
          .upstream(node_id)
          .iter()
          .filter_map(|up| completed.get(up))
          .filter(|r| r.state == TaskState::Succeeded)
          .map(|r| (r.node_id.clone(), r.output.clone()))
          .collect(),
      );

      let ctx = self.context(execution_id, cancel);
      let picker = self.pickers.get(node_id).cloned();
      handles.push(tokio::spawn(run_node(ctx, node, input, picker)));
    }

    Ok(handles)
  }

  fn node(&self, node_id: &str) -> Result<&Node, RuntimeError> {
    self
      .workflow
      .get_node(node_id)
      .ok_or_else(|| RuntimeError::InvalidGraph {
        message: format!("node '{}' not found in workflow", node_id),
      })
  }

  fn context(&self, execution_id: &str, cancel: &CancellationToken) -> NodeContext<N> {
    NodeContext {
      execution_id: execution_id.to_string(),
      store: self.store.clone(),
      clock: self.clock.clone(),
      notifier: self.notifier.clone(),
      cancel: cancel.clone(),
    }
  }
}

/// Everything a spawned node task needs from the runtime.
struct NodeContext<N> {
  execution_id: String,
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
  notifier: Arc<N>,
  cancel: CancellationToken,
}

/// A node's result plus the error that failed it, if any.
struct NodeOutcome {
  result: NodeResult,
  error: Option<TaskError>,
}

/// Run one node to a terminal state, retrying retryable errors.
#[instrument(
  name = "node",
  skip_all,
  fields(execution_id = %ctx.execution_id, node_id = %node.node_id, kind = node.node_type.kind())
)]
async fn run_node<N: ExecutionNotifier>(
  ctx: NodeContext<N>,
  node: Node,
  input: serde_json::Value,
  picker: Option<Arc<CategoryPicker>>,
) -> NodeOutcome {
  let task_id = uuid::Uuid::new_v4().to_string();
  let max_attempts = 1 + node.max_retry_attempts.unwrap_or(0);
  let retry_delay = Duration::from_millis(node.retry_delay_ms.unwrap_or(0));
  let mut attempt = 0u32;

  let error = loop {
    attempt += 1;
    info!(task_id = %task_id, attempt, input = %input, "task_started");
    ctx.notifier.notify(ExecutionEvent::NodeStarted {
      execution_id: ctx.execution_id.clone(),
      node_id: node.node_id.clone(),
      attempt,
    });

    let err = match execute_node(&ctx, &node, &input, picker.as_deref()).await {
      Ok(output) => {
        ctx.notifier.notify(ExecutionEvent::NodeCompleted {
          execution_id: ctx.execution_id.clone(),
          node_id: node.node_id.clone(),
          output: output.clone(),
        });
        return NodeOutcome {
          result: NodeResult {
            task_id,
            node_id: node.node_id,
            state: TaskState::Succeeded,
            attempts: attempt,
            input,
            output,
            error: None,
          },
          error: None,
        };
      }
      Err(err) => err,
    };

    if !err.is_retryable() || attempt >= max_attempts {
      break err;
    }

    warn!(attempt, max_attempts, error = %err, "task_retrying");
    ctx.notifier.notify(ExecutionEvent::NodeRetrying {
      execution_id: ctx.execution_id.clone(),
      node_id: node.node_id.clone(),
      attempt,
      error: err.to_string(),
    });

    tokio::select! {
      _ = tokio::time::sleep(retry_delay) => {}
      _ = ctx.cancel.cancelled() => break TaskError::Cancelled,
    }
  };

  ctx.notifier.notify(ExecutionEvent::NodeFailed {
    execution_id: ctx.execution_id.clone(),
    node_id: node.node_id.clone(),
    error: error.to_string(),
  });

  NodeOutcome {
    result: NodeResult {
      task_id,
      node_id: node.node_id,
      state: TaskState::Failed,
      attempts: attempt,
      input,
      output: serde_json::Value::Null,
      error: Some(error.to_string()),
    },
    error: Some(error),
  }
}

/// One attempt at a node.
async fn execute_node<N>(
  ctx: &NodeContext<N>,
  node: &Node,
  input: &serde_json::Value,
  picker: Option<&CategoryPicker>,
) -> Result<serde_json::Value, TaskError> {
  match &node.node_type {
    NodeType::EnsureSchema => {
      ctx.store.ensure_schema().await.map_err(TaskError::write)?;
      Ok(serde_json::json!({ "schema": "ready" }))
    }
    NodeType::PickCategory { .. } => {
      let picker = picker.ok_or_else(|| TaskError::MissingInput {
        message: format!("no picker for node '{}'", node.node_id),
      })?;
      let category = picker.pick();
      info!(category = %category, "category_picked");
      Ok(serde_json::json!({ "category": category.label() }))
    }
    NodeType::Branch { categories } => {
      let label = find_category(input).ok_or_else(|| TaskError::MissingInput {
        message: format!("branch '{}' received no category", node.node_id),
      })?;
      let category = Category::new(label);
      let handler_id = select(categories, &category)?;
      Ok(serde_json::json!({
        "category": category.label(),
        "selected": handler_id.as_str(),
      }))
    }
    NodeType::Handler { category } => {
      let handler = CategoryHandler::new(ctx.store.clone(), ctx.clock.clone());
      let record = handler.run(category).await?;
      to_output(&record)
    }
    NodeType::Gate { settle_delay_ms } => {
      let gate = ConvergenceGate::new(Duration::from_millis(*settle_delay_ms));
      gate.pass(&ctx.cancel).await?;
      Ok(input.clone())
    }
    NodeType::Verify {
      recency_window_ms,
      poll_interval_ms,
      timeout_ms,
    } => {
      let verifier = RecencyVerifier::new(
        ctx.store.clone(),
        ctx.clock.clone(),
        Duration::from_millis(*recency_window_ms),
      );
      let satisfied = verifier
        .verify(
          Duration::from_millis(*timeout_ms),
          Duration::from_millis(*poll_interval_ms),
          &ctx.cancel,
        )
        .await?;
      to_output(&satisfied)
    }
  }
}

fn to_output<T: Serialize>(value: &T) -> Result<serde_json::Value, TaskError> {
  serde_json::to_value(value).map_err(|source| TaskError::Output { source })
}

/// The category carried by `input`, either directly or in one upstream output.
fn find_category(input: &serde_json::Value) -> Option<&str> {
  if let Some(label) = input.get("category").and_then(serde_json::Value::as_str) {
    return Some(label);
  }
  input
    .as_object()?
    .values()
    .find_map(|v| v.get("category").and_then(serde_json::Value::as_str))
}
