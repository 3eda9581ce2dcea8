use serde::{Deserialize, Serialize};

/// Condition under which a node runs once all of its upstream nodes are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
  /// Every upstream succeeded. A skipped upstream skips this node.
  #[default]
  AllSuccess,
  /// No upstream failed and at least one succeeded.
  NoneFailedMinOneSuccess,
  /// Every upstream reached a terminal state, whatever it was.
  AllDone,
}
