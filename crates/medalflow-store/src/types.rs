use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Error;

/// A run record as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
  pub id: i64,
  pub category: String,
  pub count: i64,
  pub created_at: DateTime<Utc>,
}

/// A run record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRunRecord {
  pub category: String,
  pub count: i64,
  pub created_at: DateTime<Utc>,
}

impl NewRunRecord {
  /// The stored form of this record. Timestamps are kept at millisecond
  /// precision.
  pub(crate) fn with_id(&self, id: i64) -> RunRecord {
    RunRecord {
      id,
      category: self.category.clone(),
      count: self.count,
      created_at: self.created_at.trunc_subsecs(3),
    }
  }
}

/// Raw row; timestamps are UTC epoch milliseconds.
#[derive(Debug, FromRow)]
pub(crate) struct RunRecordRow {
  pub id: i64,
  pub category: String,
  pub count: i64,
  pub created_at_ms: i64,
}

impl TryFrom<RunRecordRow> for RunRecord {
  type Error = Error;

  fn try_from(row: RunRecordRow) -> Result<Self, Self::Error> {
    let created_at = DateTime::from_timestamp_millis(row.created_at_ms).ok_or_else(|| {
      Error::InvalidRecord(format!(
        "record {} has out-of-range timestamp {}",
        row.id, row.created_at_ms
      ))
    })?;

    Ok(Self {
      id: row.id,
      category: row.category,
      count: row.count,
      created_at,
    })
  }
}
