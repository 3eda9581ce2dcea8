//! Post-condition verifier: poll the store for a recent run record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use medalflow_store::{RunRecord, Store};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::TaskError;

/// State of a verification.
///
/// `Polling` is the only non-terminal state; it ends in `Satisfied` or
/// `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
  Polling,
  Satisfied,
  TimedOut,
}

/// Successful outcome of [`RecencyVerifier::verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Satisfied {
  pub state: SensorState,
  /// The record that satisfied the check.
  pub record: RunRecord,
  pub polls: u32,
  pub waited_ms: u64,
}

/// Checks that a run record no older than `recency_window` exists.
pub struct RecencyVerifier {
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
  recency_window: Duration,
}

impl RecencyVerifier {
  pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, recency_window: Duration) -> Self {
    Self {
      store,
      clock,
      recency_window,
    }
  }

  /// Oldest `created_at` that still counts as recent right now.
  fn cutoff(&self) -> DateTime<Utc> {
    let now = self.clock.now();
    chrono::Duration::from_std(self.recency_window)
      .ok()
      .and_then(|window| now.checked_sub_signed(window))
      .unwrap_or(DateTime::<Utc>::MIN_UTC)
  }

  /// Run a single check.
  pub async fn poke(&self) -> Result<Option<RunRecord>, TaskError> {
    self
      .store
      .latest_record_since(self.cutoff())
      .await
      .map_err(TaskError::read)
  }

  /// Poll every `poll_interval` until a recent record shows up or `max_wait`
  /// has elapsed.
  ///
  /// The first poll happens immediately and the last one at `max_wait`. A
  /// failed poll counts as "not yet satisfied".
  #[instrument(
    name = "verify",
    skip(self, cancel),
    fields(
      recency_window_ms = self.recency_window.as_millis() as u64,
      max_wait_ms = max_wait.as_millis() as u64,
      poll_interval_ms = poll_interval.as_millis() as u64,
    )
  )]
  pub async fn verify(
    &self,
    max_wait: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
  ) -> Result<Satisfied, TaskError> {
    let started = Instant::now();
    let mut polls = 0u32;
    let mut state = SensorState::Polling;

    while state == SensorState::Polling {
      if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
      }

      polls += 1;
      match self.poke().await {
        Ok(Some(record)) => {
          let waited_ms = started.elapsed().as_millis() as u64;
          info!(
            record_id = record.id,
            category = %record.category,
            polls,
            waited_ms,
            "recent record found"
          );
          return Ok(Satisfied {
            state: SensorState::Satisfied,
            record,
            polls,
            waited_ms,
          });
        }
        Ok(None) => debug!(polls, "no recent record yet"),
        Err(e) => warn!(polls, error = %e, "poll failed, treating as not satisfied"),
      }

      let waited = started.elapsed();
      if waited >= max_wait {
        state = SensorState::TimedOut;
        continue;
      }

      let pause = poll_interval.min(max_wait - waited);
      tokio::select! {
        _ = tokio::time::sleep(pause) => {}
        _ = cancel.cancelled() => return Err(TaskError::Cancelled),
      }
    }

    let waited_ms = started.elapsed().as_millis() as u64;
    warn!(polls, waited_ms, "verification timed out");
    Err(TaskError::TimedOut {
      recency_window_ms: self.recency_window.as_millis() as u64,
      waited_ms,
      polls,
    })
  }
}
