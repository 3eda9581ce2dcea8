use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, NewRunRecord, RunRecord, Store};

/// In-memory store for tests and dry runs.
///
/// The domain dataset is modelled as a label -> row count map.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  schema_ready: bool,
  next_id: i64,
  records: Vec<RunRecord>,
  source: HashMap<String, i64>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `rows` domain rows labelled `category`.
  pub fn add_source_rows(&self, category: &str, rows: i64) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    *inner.source.entry(category.to_string()).or_default() += rows;
  }

  /// Snapshot of every appended record, oldest first.
  pub fn records(&self) -> Vec<RunRecord> {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .records
      .clone()
  }

  /// Whether `ensure_schema` has been called.
  pub fn schema_ready(&self) -> bool {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .schema_ready
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn ensure_schema(&self) -> Result<(), Error> {
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .schema_ready = true;
    Ok(())
  }

  async fn count_source(&self, category: &str) -> Result<i64, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    Ok(inner.source.get(category).copied().unwrap_or(0))
  }

  async fn append_record(&self, record: &NewRunRecord) -> Result<RunRecord, Error> {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.next_id += 1;
    let stored = record.with_id(inner.next_id);
    inner.records.push(stored.clone());
    Ok(stored)
  }

  async fn latest_record_since(&self, cutoff: DateTime<Utc>) -> Result<Option<RunRecord>, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    Ok(
      inner
        .records
        .iter()
        .filter(|r| r.created_at >= cutoff)
        .max_by_key(|r| (r.created_at, r.id))
        .cloned(),
    )
  }

  async fn list_records(&self, limit: u32) -> Result<Vec<RunRecord>, Error> {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    let mut records = inner.records.clone();
    records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    records.truncate(limit as usize);
    Ok(records)
  }
}
