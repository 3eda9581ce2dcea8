use medalflow_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("no entry points found (all nodes have incoming edges)")]
  NoEntryPoints,

  #[error("workflow must have exactly one entry point, found {0:?}")]
  MultipleEntryPoints(Vec<String>),

  #[error("graph contains a cycle through node: {0}")]
  Cycle(String),

  #[error("category '{0}' is not part of the category set")]
  UnknownCategory(String),

  #[error("invalid branch node '{node_id}': {message}")]
  InvalidBranch { node_id: String, message: String },

  #[error(transparent)]
  Config(#[from] ConfigError),
}
