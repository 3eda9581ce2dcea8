use std::collections::HashMap;

use medalflow_config::{PipelineConfig, TriggerRule};
use serde::{Deserialize, Serialize};

use crate::branch::HandlerId;
use crate::category::CategorySet;
use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{Node, NodeType};

/// Fixed node ids of the pipeline built by [`Workflow::from_config`].
///
/// Handler node ids are derived per category, see [`HandlerId`].
pub mod node_ids {
  pub const ENSURE_SCHEMA: &str = "ensure_schema";
  pub const PICK_CATEGORY: &str = "pick_category";
  pub const SELECT_BRANCH: &str = "select_branch";
  pub const CONVERGE: &str = "converge";
  pub const VERIFY_RECENT: &str = "verify_recent";
}

/// A locked workflow ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub nodes: HashMap<String, Node>,
  pub edges: Vec<(String, String)>,
}

impl Workflow {
  /// Build the branch/converge/verify pipeline described by `config`.
  ///
  /// ```text
  /// ensure_schema -> pick_category -> select_branch -> calc_<c>* -> converge -> verify_recent
  /// ```
  pub fn from_config(config: &PipelineConfig) -> Result<Self, WorkflowError> {
    config.validate()?;
    let categories = CategorySet::new(config.categories.iter().cloned())?;

    let mut nodes = HashMap::new();
    let mut edges = Vec::new();

    let mut add = |node: Node| {
      nodes.insert(node.node_id.clone(), node);
    };

    add(Node::new(node_ids::ENSURE_SCHEMA, NodeType::EnsureSchema));
    add(Node::new(
      node_ids::PICK_CATEGORY,
      NodeType::PickCategory {
        categories: categories.clone(),
      },
    ));
    add(Node::new(
      node_ids::SELECT_BRANCH,
      NodeType::Branch {
        categories: categories.clone(),
      },
    ));
    for category in &categories {
      let handler_id = HandlerId::for_category(category);
      add(
        Node::new(
          handler_id.as_str(),
          NodeType::Handler {
            category: category.clone(),
          },
        )
        .with_retries(
          config.retry.handler_retry_attempts,
          config.retry.retry_delay_ms,
        ),
      );
      edges.push((node_ids::SELECT_BRANCH.to_string(), handler_id.to_string()));
      edges.push((handler_id.to_string(), node_ids::CONVERGE.to_string()));
    }
    add(
      Node::new(
        node_ids::CONVERGE,
        NodeType::Gate {
          settle_delay_ms: config.gate.settle_delay_ms,
        },
      )
      .with_trigger_rule(TriggerRule::NoneFailedMinOneSuccess),
    );
    add(Node::new(
      node_ids::VERIFY_RECENT,
      NodeType::Verify {
        recency_window_ms: config.sensor.recency_window_ms,
        poll_interval_ms: config.sensor.poll_interval_ms,
        timeout_ms: config.sensor.timeout_ms,
      },
    ));

    edges.push((
      node_ids::ENSURE_SCHEMA.to_string(),
      node_ids::PICK_CATEGORY.to_string(),
    ));
    edges.push((
      node_ids::PICK_CATEGORY.to_string(),
      node_ids::SELECT_BRANCH.to_string(),
    ));
    edges.push((
      node_ids::CONVERGE.to_string(),
      node_ids::VERIFY_RECENT.to_string(),
    ));

    let workflow = Self {
      workflow_id: config.workflow_id.clone(),
      name: config.name.clone(),
      nodes,
      edges,
    };
    workflow.validate()?;
    Ok(workflow)
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes, &self.edges)
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// Validate the graph: known endpoints, acyclic, a single entry point, and
  /// every branch node wired to exactly one handler per category.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    Graph::validate_edges(&self.nodes, &self.edges)?;

    let graph = self.graph();
    match graph.entry_points() {
      [] => return Err(WorkflowError::NoEntryPoints),
      [_] => {}
      many => return Err(WorkflowError::MultipleEntryPoints(many.to_vec())),
    }
    graph.topological_order()?;

    for node in self.nodes.values() {
      if let NodeType::Branch { categories } = &node.node_type {
        self.validate_branch(&graph, &node.node_id, categories)?;
      }
    }

    Ok(())
  }

  fn validate_branch(
    &self,
    graph: &Graph,
    node_id: &str,
    categories: &CategorySet,
  ) -> Result<(), WorkflowError> {
    let invalid = |message: String| WorkflowError::InvalidBranch {
      node_id: node_id.to_string(),
      message,
    };

    let downstream = graph.downstream(node_id);
    for category in categories {
      let handler_id = HandlerId::for_category(category);
      if !downstream.iter().any(|id| id == handler_id.as_str()) {
        return Err(invalid(format!(
          "no downstream handler '{}' for category '{}'",
          handler_id, category
        )));
      }
      match self.get_node(handler_id.as_str()).map(|n| &n.node_type) {
        Some(NodeType::Handler { category: handled }) if handled == category => {}
        _ => {
          return Err(invalid(format!(
            "node '{}' is not a handler for category '{}'",
            handler_id, category
          )));
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Category;

  fn default_workflow() -> Workflow {
    Workflow::from_config(&PipelineConfig::default()).unwrap()
  }

  #[test]
  fn test_default_pipeline_shape() {
    let workflow = default_workflow();
    let graph = workflow.graph();

    assert_eq!(workflow.nodes.len(), 8);
    assert_eq!(graph.entry_points(), &[node_ids::ENSURE_SCHEMA.to_string()]);
    assert_eq!(graph.downstream(node_ids::SELECT_BRANCH).len(), 3);
    assert!(graph.is_join_point(node_ids::CONVERGE));
    assert_eq!(
      graph.downstream(node_ids::CONVERGE),
      &[node_ids::VERIFY_RECENT.to_string()]
    );
  }

  #[test]
  fn test_handlers_are_parameterized() {
    let workflow = default_workflow();
    let node = workflow.get_node("calc_Gold").unwrap();
    assert_eq!(
      node.node_type,
      NodeType::Handler {
        category: Category::new("Gold")
      }
    );
    assert_eq!(node.trigger_rule, TriggerRule::AllSuccess);
  }

  #[test]
  fn test_gate_uses_none_failed_min_one_success() {
    let workflow = default_workflow();
    let gate = workflow.get_node(node_ids::CONVERGE).unwrap();
    assert_eq!(gate.trigger_rule, TriggerRule::NoneFailedMinOneSuccess);
    assert_eq!(
      gate.node_type,
      NodeType::Gate {
        settle_delay_ms: 1_000
      }
    );
  }

  #[test]
  fn test_retry_policy_applies_to_handlers() {
    let mut config = PipelineConfig::default();
    config.retry.handler_retry_attempts = 2;
    config.retry.retry_delay_ms = 50;

    let workflow = Workflow::from_config(&config).unwrap();
    let node = workflow.get_node("calc_Bronze").unwrap();
    assert_eq!(node.max_retry_attempts, Some(2));
    assert_eq!(node.retry_delay_ms, Some(50));
  }

  #[test]
  fn test_topological_order_covers_pipeline() {
    let order = default_workflow().graph().topological_order().unwrap();
    assert_eq!(order.first().map(String::as_str), Some(node_ids::ENSURE_SCHEMA));
    assert_eq!(order.last().map(String::as_str), Some(node_ids::VERIFY_RECENT));
  }

  #[test]
  fn test_validate_rejects_branch_without_handler() {
    let mut workflow = default_workflow();
    workflow
      .edges
      .retain(|(from, to)| !(from == node_ids::SELECT_BRANCH && to == "calc_Silver"));
    workflow.nodes.remove("calc_Silver");
    workflow.edges.retain(|(from, _)| from != "calc_Silver");

    let err = workflow.validate().unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidBranch { .. }));
  }

  #[test]
  fn test_validate_rejects_second_entry_point() {
    let mut workflow = default_workflow();
    workflow.nodes.insert(
      "stray".to_string(),
      Node::new("stray", NodeType::EnsureSchema),
    );

    let err = workflow.validate().unwrap_err();
    assert!(matches!(err, WorkflowError::MultipleEntryPoints(ids) if ids.len() == 2));
  }

  #[test]
  fn test_workflow_serde_roundtrip() {
    let workflow = default_workflow();
    let json = serde_json::to_string(&workflow).unwrap();
    let back: Workflow = serde_json::from_str(&json).unwrap();
    assert_eq!(back, workflow);
  }

  #[test]
  fn test_from_config_rejects_invalid_config() {
    let config = PipelineConfig {
      categories: vec![],
      ..PipelineConfig::default()
    };
    assert!(matches!(
      Workflow::from_config(&config),
      Err(WorkflowError::Config(_))
    ));
  }
}
