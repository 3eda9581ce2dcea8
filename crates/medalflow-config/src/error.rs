use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("at least one category is required")]
  NoCategories,

  #[error("invalid category label '{0}' (allowed: letters, digits, '_' and '-')")]
  InvalidCategory(String),

  #[error("duplicate category label: {0}")]
  DuplicateCategory(String),

  #[error("invalid SQL identifier for {field}: '{value}'")]
  InvalidIdentifier { field: &'static str, value: String },

  #[error("invalid sensor settings: {0}")]
  InvalidSensor(String),
}
