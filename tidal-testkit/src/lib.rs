//! Virtual-time unit-test harness for Tidal workflows and activities.
//!
//! The harness runs workflow code in-process against a mock clock: when the
//! workflow has nothing to do and no background work is in flight, virtual
//! time jumps straight to the next pending timer, so an hour-long sleep
//! finishes in microseconds. Activities run on background workers and post
//! their results back onto a single-threaded main loop, and an expectations
//! overlay can intercept any activity or workflow invocation with programmed
//! return values, optional virtual-time waits and side-effect hooks.

pub mod clock;
pub mod env;
pub mod mock;
pub mod suite;

pub use clock::{MockClock, MockTimer};
pub use env::TestWorkflowEnvironment;
pub use mock::{MockActivityBuilder, MockWorkflowBuilder};
pub use suite::{TestActivityEnvironment, TestSuite};

use std::time::Duration;

/// Task list used when a test does not specify one.
pub const DEFAULT_TEST_TASK_LIST: &str = "default-test-tasklist";
/// Workflow id assigned to the workflow under test.
pub const DEFAULT_TEST_WORKFLOW_ID: &str = "default-test-workflow-id";
/// Run id assigned to the workflow under test.
pub const DEFAULT_TEST_RUN_ID: &str = "default-test-run-id";
/// Domain assigned to the workflow under test.
pub const DEFAULT_TEST_DOMAIN: &str = "default-test-domain";
/// Wall-clock budget for a test before the harness declares a deadlock.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Built-in query type answering with the workflow's logical stack.
pub const QUERY_TYPE_STACK_TRACE: &str = "__stack_trace";
