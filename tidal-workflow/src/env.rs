//! The environment seam between workflow code and its host.
//!
//! Workflow code never talks to a scheduler directly; every request for a
//! timer, an activity or a child workflow goes through [`WorkflowEnvironment`]
//! together with a callback that the host invokes exactly once with the
//! outcome. The test environment implements this trait on top of a virtual
//! clock and a single-threaded main loop.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tidal_core::{ChildWorkflowParams, ExecuteActivityParams, TidalError, WorkflowExecution, WorkflowInfo};

/// Callback invoked with the encoded outcome of an asynchronous request.
pub type ResultHandler = Box<dyn FnOnce(Option<Vec<u8>>, Option<TidalError>) + Send>;

/// Callback invoked when a child workflow execution has been assigned its
/// identity.
pub type StartedHandler = Box<dyn FnOnce(WorkflowExecution) + Send>;

/// Handler for signals delivered to the workflow.
pub type SignalHandler = Box<dyn FnMut(&str, Option<Vec<u8>>) + Send>;

/// Handler answering queries against the workflow.
pub type QueryHandler =
    Box<dyn Fn(&str, Option<Vec<u8>>) -> Result<Option<Vec<u8>>, TidalError> + Send>;

/// Handler invoked when cancellation of the workflow is requested.
pub type CancelHandler = Box<dyn Fn() + Send>;

/// Host contract consumed by workflow code.
///
/// All methods are called from the host's main loop except where noted;
/// implementations route results back onto that loop themselves.
pub trait WorkflowEnvironment: Send + Sync {
    fn workflow_info(&self) -> WorkflowInfo;

    /// Current workflow time. Deterministic; backed by the host's clock.
    fn now(&self) -> DateTime<Utc>;

    /// Start a timer. The callback fires with `(None, None)` when the timer
    /// elapses, or with a canceled error if the timer is cancelled first.
    /// Returns the timer id.
    fn new_timer(&self, duration: Duration, callback: ResultHandler) -> String;

    fn request_cancel_timer(&self, timer_id: &str);

    /// Schedule an activity. Returns the activity id.
    fn execute_activity(&self, params: ExecuteActivityParams, callback: ResultHandler) -> String;

    fn request_cancel_activity(&self, activity_id: &str);

    /// Start a child workflow. `started_handler` is invoked synchronously
    /// with the child's execution identity; `callback` fires when the child
    /// completes.
    fn execute_child_workflow(
        &self,
        params: ChildWorkflowParams,
        callback: ResultHandler,
        started_handler: StartedHandler,
    ) -> Result<(), TidalError>;

    fn request_cancel_workflow(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<(), TidalError>;

    /// Run a side effect and deliver its encoded result through the callback
    /// on the calling thread, without a scheduling hop.
    fn side_effect(
        &self,
        func: Box<dyn FnOnce() -> Result<Vec<u8>, TidalError> + Send>,
        callback: ResultHandler,
    );

    /// Resolve a versioning change id. The first request locks in
    /// `max_supported`; later requests validate against the recorded value.
    fn get_version(&self, change_id: &str, min_supported: i32, max_supported: i32) -> i32;

    fn register_cancel_handler(&self, handler: CancelHandler);
    fn register_signal_handler(&self, handler: SignalHandler);
    fn register_query_handler(&self, handler: QueryHandler);

    /// Finalize the workflow with its result or error. Idempotent; only the
    /// first call takes effect.
    fn complete(&self, result: Option<Vec<u8>>, error: Option<TidalError>);
}
