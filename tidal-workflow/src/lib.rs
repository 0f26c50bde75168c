//! Workflow authoring SDK for Tidal.
//!
//! This crate defines the surface workflow code is written against: the
//! [`WorkflowContext`] API, the deterministic task dispatcher that drives
//! workflow futures, workflow channels for in-workflow coordination, and the
//! [`WorkflowEnvironment`] seam implemented by whatever hosts the workflow
//! (in this repository, the test environment).

pub mod channel;
pub mod context;
pub mod definition;
pub mod dispatcher;
pub mod env;

pub use context::*;
pub use definition::*;
pub use dispatcher::{DispatcherError, TaskState, WorkflowDispatcher, WorkflowTask};
pub use env::*;
