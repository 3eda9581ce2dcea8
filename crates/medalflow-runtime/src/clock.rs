//! Wall-clock sources.
//!
//! Handlers stamp run records with [`Clock::now`] and the verifier measures
//! recency against it, so both must agree on what "now" is.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Wall-clock time that advances with tokio's clock.
///
/// Anchored at construction; afterwards it moves exactly as
/// `tokio::time::Instant` does, including under `tokio::time::pause` and
/// `advance`.
#[derive(Debug, Clone)]
pub struct TokioClock {
  origin: DateTime<Utc>,
  start: Instant,
}

impl TokioClock {
  pub fn new() -> Self {
    Self::starting_at(Utc::now())
  }

  pub fn starting_at(origin: DateTime<Utc>) -> Self {
    Self {
      origin,
      start: Instant::now(),
    }
  }
}

impl Default for TokioClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for TokioClock {
  fn now(&self) -> DateTime<Utc> {
    chrono::Duration::from_std(self.start.elapsed())
      .ok()
      .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }
}
