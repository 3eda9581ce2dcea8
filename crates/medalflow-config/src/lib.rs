//! Medalflow Config
//!
//! This crate contains the serializable configuration for the medalflow
//! pipeline. Every field has a default, so an empty JSON object (or no file at
//! all) yields the stock pipeline: three medal categories, a one second
//! settle delay and a sensor that waits up to a minute for a record that is
//! at most thirty seconds old.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=pipeline.json`)
//! - Inline JSON strings (tests, embedding)
//!
//! The workflow crate turns a validated [`PipelineConfig`] into a locked
//! task graph.

mod enums;
mod error;
mod pipeline;

pub use enums::TriggerRule;
pub use error::ConfigError;
pub use pipeline::{
  GateConfig, PipelineConfig, RetryConfig, SensorConfig, StoreConfig, validate_categories,
};
