use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub workflow_id: String,
  pub name: String,
  /// The closed category enumeration. One of these is picked per run.
  pub categories: Vec<String>,
  pub store: StoreConfig,
  pub gate: GateConfig,
  pub sensor: SensorConfig,
  pub retry: RetryConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      workflow_id: "medal_count".to_string(),
      name: "Count medals and record the tally".to_string(),
      categories: vec![
        "Bronze".to_string(),
        "Silver".to_string(),
        "Gold".to_string(),
      ],
      store: StoreConfig::default(),
      gate: GateConfig::default(),
      sensor: SensorConfig::default(),
      retry: RetryConfig::default(),
    }
  }
}

/// Where run records are written and where the domain rows are counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// sqlx connection string, e.g. `sqlite:medalflow.db` or `sqlite::memory:`.
  pub database_url: String,
  /// Table that receives run records. Created if missing.
  pub records_table: String,
  /// Read-only table holding the domain rows to aggregate.
  pub source_table: String,
  /// Column of `source_table` compared against the category label.
  pub source_column: String,
  pub max_connections: u32,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      database_url: "sqlite:medalflow.db".to_string(),
      records_table: "medal_counts".to_string(),
      source_table: "athlete_event_results".to_string(),
      source_column: "medal".to_string(),
      max_connections: 5,
    }
  }
}

/// Convergence gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
  /// Pause before the verifier runs.
  pub settle_delay_ms: u64,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      settle_delay_ms: 1_000,
    }
  }
}

impl GateConfig {
  pub fn settle_delay(&self) -> Duration {
    Duration::from_millis(self.settle_delay_ms)
  }
}

/// Post-condition verifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
  /// Maximum age of a record that satisfies the check.
  pub recency_window_ms: u64,
  pub poll_interval_ms: u64,
  /// Total time the verifier keeps polling before giving up.
  pub timeout_ms: u64,
}

impl Default for SensorConfig {
  fn default() -> Self {
    Self {
      recency_window_ms: 30_000,
      poll_interval_ms: 5_000,
      timeout_ms: 60_000,
    }
  }
}

impl SensorConfig {
  pub fn recency_window(&self) -> Duration {
    Duration::from_millis(self.recency_window_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// Retry policy applied to category handler nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Extra attempts after the first failure. Zero disables retries.
  pub handler_retry_attempts: u32,
  pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      handler_retry_attempts: 0,
      retry_delay_ms: 1_000,
    }
  }
}

impl RetryConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }
}

impl PipelineConfig {
  /// Parse and validate a JSON document.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Read, parse and validate a JSON config file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json_str(&content)
  }

  /// Check the invariants the rest of the pipeline relies on.
  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_categories(&self.categories)?;

    validate_identifier("store.records_table", &self.store.records_table)?;
    validate_identifier("store.source_table", &self.store.source_table)?;
    validate_identifier("store.source_column", &self.store.source_column)?;

    if self.sensor.poll_interval_ms == 0 {
      return Err(ConfigError::InvalidSensor(
        "poll_interval_ms must be greater than zero".to_string(),
      ));
    }
    if self.sensor.poll_interval_ms > self.sensor.timeout_ms {
      return Err(ConfigError::InvalidSensor(format!(
        "poll_interval_ms ({}) exceeds timeout_ms ({})",
        self.sensor.poll_interval_ms, self.sensor.timeout_ms
      )));
    }
    if self.sensor.recency_window_ms == 0 {
      return Err(ConfigError::InvalidSensor(
        "recency_window_ms must be greater than zero".to_string(),
      ));
    }

    Ok(())
  }
}

/// Validate a category enumeration: non-empty, unique, id-safe labels.
///
/// Labels end up inside node ids (`calc_<label>`), so they are restricted to
/// ASCII letters, digits, `_` and `-`.
pub fn validate_categories(labels: &[String]) -> Result<(), ConfigError> {
  if labels.is_empty() {
    return Err(ConfigError::NoCategories);
  }

  let mut seen = HashSet::new();
  for label in labels {
    let valid = !label.is_empty()
      && label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
      return Err(ConfigError::InvalidCategory(label.clone()));
    }
    if !seen.insert(label.as_str()) {
      return Err(ConfigError::DuplicateCategory(label.clone()));
    }
  }

  Ok(())
}

/// Table and column names are spliced into SQL text, so only plain
/// (optionally schema-qualified) identifiers are accepted.
fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
  let valid = !value.is_empty()
    && value.split('.').all(|part| {
      let mut chars = part.chars();
      matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    });

  if valid {
    Ok(())
  } else {
    Err(ConfigError::InvalidIdentifier {
      field,
      value: value.to_string(),
    })
  }
}
