use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medalflow_config::StoreConfig;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::types::RunRecordRow;
use crate::{Error, NewRunRecord, RunRecord, Store};

/// SQLite-based store implementation.
///
/// Table and column names come from [`StoreConfig`]; they are validated as
/// plain identifiers by `PipelineConfig::validate` before they reach SQL text.
pub struct SqliteStore {
  pool: SqlitePool,
  records_table: String,
  source_table: String,
  source_column: String,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool, config: &StoreConfig) -> Self {
    Self {
      pool,
      records_table: config.records_table.clone(),
      source_table: config.source_table.clone(),
      source_column: config.source_column.clone(),
    }
  }

  /// Open (creating if missing) the database at `config.database_url`.
  pub async fn connect(config: &StoreConfig) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(config.max_connections.max(1))
      .connect_with(options)
      .await?;

    debug!(database_url = %config.database_url, "sqlite store connected");
    Ok(Self::new(pool, config))
  }

  /// A private in-memory database.
  ///
  /// Each `:memory:` connection is its own database, so the pool is pinned
  /// to a single connection that is never recycled.
  pub async fn in_memory(config: &StoreConfig) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .idle_timeout(None::<Duration>)
      .max_lifetime(None::<Duration>)
      .connect_with(options)
      .await?;

    Ok(Self::new(pool, config))
  }

  /// Get the underlying pool (for seeding the domain dataset, migrations, etc.).
  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn ensure_schema(&self) -> Result<(), Error> {
    let sql = format!(
      r#"
      CREATE TABLE IF NOT EXISTS {} (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        count INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
      )
      "#,
      self.records_table
    );
    sqlx::query(&sql).execute(&self.pool).await?;

    debug!(table = %self.records_table, "run record table ready");
    Ok(())
  }

  async fn count_source(&self, category: &str) -> Result<i64, Error> {
    let sql = format!(
      "SELECT COUNT(*) FROM {} WHERE {} = ?",
      self.source_table, self.source_column
    );
    let count = sqlx::query_scalar::<_, i64>(&sql)
      .bind(category)
      .fetch_one(&self.pool)
      .await?;

    Ok(count)
  }

  async fn append_record(&self, record: &NewRunRecord) -> Result<RunRecord, Error> {
    let sql = format!(
      "INSERT INTO {} (category, count, created_at_ms) VALUES (?, ?, ?)",
      self.records_table
    );
    let result = sqlx::query(&sql)
      .bind(&record.category)
      .bind(record.count)
      .bind(record.created_at.timestamp_millis())
      .execute(&self.pool)
      .await?;

    Ok(record.with_id(result.last_insert_rowid()))
  }

  async fn latest_record_since(&self, cutoff: DateTime<Utc>) -> Result<Option<RunRecord>, Error> {
    let sql = format!(
      r#"
      SELECT id, category, count, created_at_ms
      FROM {}
      WHERE created_at_ms >= ?
      ORDER BY created_at_ms DESC, id DESC
      LIMIT 1
      "#,
      self.records_table
    );
    let row = sqlx::query_as::<_, RunRecordRow>(&sql)
      .bind(cutoff.timestamp_millis())
      .fetch_optional(&self.pool)
      .await?;

    row.map(RunRecord::try_from).transpose()
  }

  async fn list_records(&self, limit: u32) -> Result<Vec<RunRecord>, Error> {
    let sql = format!(
      r#"
      SELECT id, category, count, created_at_ms
      FROM {}
      ORDER BY created_at_ms DESC, id DESC
      LIMIT ?
      "#,
      self.records_table
    );
    let rows = sqlx::query_as::<_, RunRecordRow>(&sql)
      .bind(i64::from(limit))
      .fetch_all(&self.pool)
      .await?;

    rows.into_iter().map(RunRecord::try_from).collect()
  }
}
