//! Execution result types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Terminal state of one node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
  Succeeded,
  Failed,
  /// Not executed: a branch chose a sibling, or the trigger rule said skip.
  Skipped,
  /// Not executed because an upstream node failed.
  UpstreamFailed,
}

/// Result of a single node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
  /// Unique task ID for this execution.
  pub task_id: String,
  /// Node ID that was executed.
  pub node_id: String,
  pub state: TaskState,
  /// Number of attempts made (0 for skipped nodes).
  pub attempts: u32,
  /// Outputs of succeeded upstream nodes, keyed by node id.
  pub input: serde_json::Value,
  /// Node output (`null` unless the node succeeded).
  pub output: serde_json::Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl NodeResult {
  pub(crate) fn not_run(node_id: &str, state: TaskState) -> Self {
    Self {
      task_id: uuid::Uuid::new_v4().to_string(),
      node_id: node_id.to_string(),
      state,
      attempts: 0,
      input: serde_json::Value::Null,
      output: serde_json::Value::Null,
      error: None,
    }
  }
}

/// Result of a complete workflow invocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeResult {
  /// Unique execution ID.
  pub execution_id: String,
  /// Results of all nodes, keyed by node_id.
  pub node_results: HashMap<String, NodeResult>,
}

impl InvokeResult {
  pub fn state(&self, node_id: &str) -> Option<TaskState> {
    self.node_results.get(node_id).map(|r| r.state)
  }

  pub fn output(&self, node_id: &str) -> Option<&serde_json::Value> {
    self.node_results.get(node_id).map(|r| &r.output)
  }

  /// Ids of nodes in `state`, sorted.
  pub fn nodes_in_state(&self, state: TaskState) -> Vec<&str> {
    let mut ids: Vec<&str> = self
      .node_results
      .values()
      .filter(|r| r.state == state)
      .map(|r| r.node_id.as_str())
      .collect();
    ids.sort_unstable();
    ids
  }
}
