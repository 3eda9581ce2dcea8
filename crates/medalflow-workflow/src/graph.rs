use std::collections::{HashMap, HashSet, VecDeque};

use crate::Node;
use crate::error::WorkflowError;

/// Graph structure for traversal and analysis.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> list of upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no incoming edges.
  entry_points: Vec<String>,
  /// Nodes with multiple incoming edges (join points).
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from nodes and edges.
  ///
  /// Edges are not checked here; see [`Graph::validate_edges`].
  pub fn new(nodes: &HashMap<String, Node>, edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node_id in nodes.keys() {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    for (from, to) in edges {
      adjacency.entry(from.clone()).or_default().push(to.clone());
      reverse_adjacency
        .entry(to.clone())
        .or_default()
        .push(from.clone());
    }

    // Sorted so traversal order does not depend on HashMap iteration
    let mut entry_points: Vec<String> = nodes
      .keys()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();
    entry_points.sort();

    let join_points: HashSet<String> = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.len() > 1)
      .map(|(id, _)| id.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      join_points,
    }
  }

  /// Check that every edge endpoint is a known node.
  pub fn validate_edges(
    nodes: &HashMap<String, Node>,
    edges: &[(String, String)],
  ) -> Result<(), WorkflowError> {
    for (from, to) in edges {
      if !nodes.contains_key(from) || !nodes.contains_key(to) {
        return Err(WorkflowError::InvalidEdge {
          from: from.clone(),
          to: to.clone(),
        });
      }
    }
    Ok(())
  }

  /// Get entry points (nodes with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a node is a join point (has multiple incoming edges).
  pub fn is_join_point(&self, node_id: &str) -> bool {
    self.join_points.contains(node_id)
  }

  /// Get all join points.
  pub fn join_points(&self) -> &HashSet<String> {
    &self.join_points
  }

  /// Kahn's algorithm. Ties are broken by node id so the order is stable.
  pub fn topological_order(&self) -> Result<Vec<String>, WorkflowError> {
    let mut in_degree: HashMap<&str, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, incoming)| (id.as_str(), incoming.len()))
      .collect();

    let mut queue: VecDeque<&str> = self.entry_points.iter().map(String::as_str).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node_id) = queue.pop_front() {
      order.push(node_id.to_string());

      let mut released: Vec<&str> = Vec::new();
      for next in self.downstream(node_id) {
        if let Some(degree) = in_degree.get_mut(next.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            released.push(next.as_str());
          }
        }
      }
      released.sort_unstable();
      queue.extend(released);
    }

    if order.len() != in_degree.len() {
      let mut stuck: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(id, _)| *id)
        .collect();
      stuck.sort_unstable();
      return Err(WorkflowError::Cycle(
        stuck.first().copied().unwrap_or_default().to_string(),
      ));
    }

    Ok(order)
  }
}
