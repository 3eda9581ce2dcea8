//! Medalflow Runtime
//!
//! This crate provides the task runtime for medalflow: the building blocks
//! of a run (category picker, category handler, convergence gate, recency
//! verifier) and the [`Runtime`] that executes a locked
//! [`medalflow_workflow::Workflow`] with them.
//!
//! Each run has its own execution context. The picked category travels to
//! the branch node as upstream output, the branch decision activates exactly
//! one handler and every sibling handler ends up skipped.

mod clock;
mod error;
mod events;
mod gate;
mod handler;
mod picker;
mod result;
mod runtime;
mod verifier;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::{RuntimeError, TaskError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use gate::{ConvergenceGate, Readiness, evaluate};
pub use handler::CategoryHandler;
pub use picker::CategoryPicker;
pub use result::{InvokeResult, NodeResult, TaskState};
pub use runtime::{Runtime, RuntimeConfig};
pub use verifier::{RecencyVerifier, Satisfied, SensorState};
