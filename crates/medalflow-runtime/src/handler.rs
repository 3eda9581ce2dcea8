//! Category handler: aggregate domain rows and append a run record.

use std::sync::Arc;

use medalflow_store::{NewRunRecord, RunRecord, Store};
use medalflow_workflow::Category;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::error::TaskError;

/// One handler serves every category; the category is a runtime argument.
pub struct CategoryHandler {
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
}

impl CategoryHandler {
  pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Count the domain rows for `category` and append `{category, count, now}`.
  ///
  /// Running it again appends another record; callers may retry freely.
  #[instrument(name = "handler_run", skip(self), fields(category = %category))]
  pub async fn run(&self, category: &Category) -> Result<RunRecord, TaskError> {
    let count = self
      .store
      .count_source(category.label())
      .await
      .map_err(TaskError::read)?;

    let record = NewRunRecord {
      category: category.label().to_string(),
      count,
      created_at: self.clock.now(),
    };
    let stored = self
      .store
      .append_record(&record)
      .await
      .map_err(TaskError::write)?;

    info!(record_id = stored.id, count, "run record appended");
    Ok(stored)
  }
}
