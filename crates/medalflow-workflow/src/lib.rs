//! Medalflow Workflow
//!
//! This crate provides the "locked" workflow representation for medalflow.
//! A locked workflow is a validated task graph built from a
//! [`medalflow_config::PipelineConfig`] that is ready for execution.
//!
//! Key properties:
//! - Graph structure is validated (known endpoints, acyclic, single entry point)
//! - Every branch node has exactly one handler node per category
//! - Handler nodes are parameterized by their category; there is one handler
//!   implementation, not one per category
//! - Branch decisions are pure functions of a [`Category`] (see [`select`])

mod branch;
mod category;
mod error;
mod graph;
mod node;
mod workflow;

pub use branch::{HandlerId, select};
pub use category::{Category, CategorySet};
pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{Node, NodeType};
pub use workflow::{Workflow, node_ids};
