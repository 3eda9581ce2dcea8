use medalflow_config::TriggerRule;
use serde::{Deserialize, Serialize};

use crate::category::{Category, CategorySet};

/// A locked node in the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  #[serde(flatten)]
  pub node_type: NodeType,
  #[serde(default)]
  pub trigger_rule: TriggerRule,
  /// Extra attempts after a retryable failure.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_delay_ms: Option<u64>,
}

impl Node {
  /// A node with the default trigger rule and no retries.
  pub fn new(node_id: impl Into<String>, node_type: NodeType) -> Self {
    Self {
      node_id: node_id.into(),
      node_type,
      trigger_rule: TriggerRule::default(),
      max_retry_attempts: None,
      retry_delay_ms: None,
    }
  }

  pub fn with_trigger_rule(mut self, trigger_rule: TriggerRule) -> Self {
    self.trigger_rule = trigger_rule;
    self
  }

  pub fn with_retries(mut self, attempts: u32, delay_ms: u64) -> Self {
    self.max_retry_attempts = Some(attempts);
    self.retry_delay_ms = Some(delay_ms);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeType {
  /// Create the run record table if it does not exist.
  EnsureSchema,
  /// Pick one category uniformly at random.
  PickCategory { categories: CategorySet },
  /// Route to the handler of the category produced upstream. Every other
  /// direct downstream node is skipped.
  Branch { categories: CategorySet },
  /// Count domain rows for `category` and append a run record.
  Handler { category: Category },
  /// Wait for writes to settle before verification.
  Gate { settle_delay_ms: u64 },
  /// Poll the store for a sufficiently recent run record.
  Verify {
    recency_window_ms: u64,
    poll_interval_ms: u64,
    timeout_ms: u64,
  },
}

impl NodeType {
  /// Short name used in logs and events.
  pub fn kind(&self) -> &'static str {
    match self {
      NodeType::EnsureSchema => "ensure_schema",
      NodeType::PickCategory { .. } => "pick_category",
      NodeType::Branch { .. } => "branch",
      NodeType::Handler { .. } => "handler",
      NodeType::Gate { .. } => "gate",
      NodeType::Verify { .. } => "verify",
    }
  }
}
