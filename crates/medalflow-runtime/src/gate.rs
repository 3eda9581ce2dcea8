//! Trigger rules and the convergence gate.

use std::time::Duration;

use medalflow_config::TriggerRule;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::result::TaskState;

/// What to do with a node whose upstream nodes are all terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
  Run,
  Skip,
  UpstreamFailed,
}

/// Apply `rule` to the terminal states of a node's upstream nodes.
///
/// Nodes without upstream nodes always run.
pub fn evaluate(rule: TriggerRule, upstream: &[TaskState]) -> Readiness {
  if upstream.is_empty() {
    return Readiness::Run;
  }

  let failed = upstream
    .iter()
    .any(|s| matches!(s, TaskState::Failed | TaskState::UpstreamFailed));
  let succeeded = upstream.iter().filter(|s| **s == TaskState::Succeeded).count();

  match rule {
    TriggerRule::AllSuccess => {
      if failed {
        Readiness::UpstreamFailed
      } else if succeeded == upstream.len() {
        Readiness::Run
      } else {
        Readiness::Skip
      }
    }
    TriggerRule::NoneFailedMinOneSuccess => {
      if failed {
        Readiness::UpstreamFailed
      } else if succeeded > 0 {
        Readiness::Run
      } else {
        Readiness::Skip
      }
    }
    TriggerRule::AllDone => Readiness::Run,
  }
}

/// Barrier that pauses before letting the run continue.
///
/// The pause lets asynchronous store writes become visible to the verifier.
/// A zero delay passes straight through.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceGate {
  settle_delay: Duration,
}

impl ConvergenceGate {
  pub fn new(settle_delay: Duration) -> Self {
    Self { settle_delay }
  }

  /// Wait out the settle delay, or return early on cancellation.
  pub async fn pass(&self, cancel: &CancellationToken) -> Result<(), TaskError> {
    if self.settle_delay.is_zero() {
      return Ok(());
    }

    debug!(settle_delay_ms = self.settle_delay.as_millis() as u64, "gate settling");
    tokio::select! {
      _ = tokio::time::sleep(self.settle_delay) => Ok(()),
      _ = cancel.cancelled() => Err(TaskError::Cancelled),
    }
  }
}
