//! Medalflow Store
//!
//! This crate provides the storage trait and implementations for run records.
//! Records are appended by category handlers and read back by the recency
//! verifier. The same store also answers the aggregate query over the domain
//! dataset that handlers record.
//!
//! The [`Store`] trait defines operations for:
//! - Creating the run record table (idempotent)
//! - Counting domain rows for a category
//! - Appending run records
//! - Querying the newest record inside a recency window

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{NewRunRecord, RunRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A stored row could not be turned into a record.
  #[error("invalid record: {0}")]
  InvalidRecord(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for run records and the domain dataset they summarize.
///
/// Implementations must tolerate concurrent appends; nothing here is ever
/// updated or deleted.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create the run record table if it does not exist.
  async fn ensure_schema(&self) -> Result<(), Error>;

  /// Number of domain rows labelled with `category`.
  async fn count_source(&self, category: &str) -> Result<i64, Error>;

  /// Append a run record and return it with its assigned id.
  async fn append_record(&self, record: &NewRunRecord) -> Result<RunRecord, Error>;

  /// The newest record created at or after `cutoff`, if any.
  async fn latest_record_since(&self, cutoff: DateTime<Utc>) -> Result<Option<RunRecord>, Error>;

  /// The most recent records, newest first.
  async fn list_records(&self, limit: u32) -> Result<Vec<RunRecord>, Error>;
}
