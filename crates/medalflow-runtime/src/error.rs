//! Runtime error types.

use medalflow_workflow::WorkflowError;

/// Errors raised by a single node execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
  /// The branch selector was handed a category outside its set.
  #[error("unknown category: {0}")]
  UnknownCategory(String),

  /// A store query failed. Retryable.
  #[error("storage read failed: {source}")]
  StorageRead {
    #[source]
    source: medalflow_store::Error,
  },

  /// A store write failed. Retryable.
  #[error("storage write failed: {source}")]
  StorageWrite {
    #[source]
    source: medalflow_store::Error,
  },

  /// The verifier gave up without seeing a recent enough record.
  #[error(
    "no record newer than {recency_window_ms} ms appeared within {waited_ms} ms ({polls} polls)"
  )]
  TimedOut {
    recency_window_ms: u64,
    waited_ms: u64,
    polls: u32,
  },

  /// A node expected data from upstream that was not there.
  #[error("missing input: {message}")]
  MissingInput { message: String },

  /// A node produced output that could not be encoded as JSON.
  #[error("failed to encode node output: {source}")]
  Output {
    #[source]
    source: serde_json::Error,
  },

  /// Execution was cancelled.
  #[error("task cancelled")]
  Cancelled,
}

impl TaskError {
  pub(crate) fn read(source: medalflow_store::Error) -> Self {
    Self::StorageRead { source }
  }

  pub(crate) fn write(source: medalflow_store::Error) -> Self {
    Self::StorageWrite { source }
  }

  /// Whether the runtime may retry the node after this error.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::StorageRead { .. } | Self::StorageWrite { .. })
  }
}

impl From<WorkflowError> for TaskError {
  fn from(err: WorkflowError) -> Self {
    match err {
      WorkflowError::UnknownCategory(label) => Self::UnknownCategory(label),
      other => Self::MissingInput {
        message: other.to_string(),
      },
    }
  }
}

/// Errors that can occur during runtime execution.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// The workflow failed validation.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// Invalid workflow graph structure or internal scheduling failure.
  #[error("invalid graph: {message}")]
  InvalidGraph { message: String },

  /// A node failed after exhausting its retries.
  #[error("node '{node_id}' failed: {source}")]
  TaskFailed {
    node_id: String,
    #[source]
    source: TaskError,
  },
}
