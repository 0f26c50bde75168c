//! Worker-side building blocks for the Tidal test harness: the host registry
//! of workflows and activities, typed registration helpers, and the activity
//! task handler that executes activity tasks in-process.

pub mod registry;
pub mod task_handler;

pub use registry::*;
pub use task_handler::*;
