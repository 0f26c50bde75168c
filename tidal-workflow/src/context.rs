//! Workflow context and core functions for authoring workflows.
//!
//! This module provides the API workflow code runs against: scheduling
//! activities and child workflows, timers, signals, queries, side effects and
//! versioning. Every operation is requested through the host's
//! [`WorkflowEnvironment`] at call time and returns a future that resolves
//! when the host delivers the outcome, so sibling requests run concurrently.

use crate::dispatcher::WorkflowTask;
use crate::env::{ResultHandler, WorkflowEnvironment};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tidal_core::{
    encode_args, ChildWorkflowParams, ContinueAsNewError, ExecuteActivityParams, TidalError,
    WorkflowExecution, WorkflowInfo,
};

type Outcome = (Option<Vec<u8>>, Option<TidalError>);

/// Single-use slot bridging a host callback to a workflow future.
#[derive(Clone, Default)]
struct CompletionSlot {
    inner: Arc<Mutex<Option<Outcome>>>,
}

impl CompletionSlot {
    fn new() -> Self {
        Self::default()
    }

    /// Produce the host-side callback that fills this slot.
    fn handler(&self) -> ResultHandler {
        let inner = self.inner.clone();
        Box::new(move |result, err| {
            *inner.lock().unwrap() = Some((result, err));
        })
    }

    fn complete(&self, result: Option<Vec<u8>>, err: Option<TidalError>) {
        *self.inner.lock().unwrap() = Some((result, err));
    }

    fn poll_take(&self) -> Poll<Outcome> {
        match self.inner.lock().unwrap().take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

fn decode_outcome<R: DeserializeOwned>(outcome: Outcome) -> Result<R, TidalError> {
    match outcome {
        (_, Some(err)) => Err(err),
        (result, None) => tidal_core::decode_args(result.as_deref())
            .map_err(|e| TidalError::Serialization(e.to_string())),
    }
}

/// Future resolving to an activity's typed result
pub struct ActivityFuture<R> {
    slot: CompletionSlot,
    activity_id: String,
    _result: PhantomData<fn() -> R>,
}

impl<R> ActivityFuture<R> {
    /// Id of the scheduled activity, usable with `cancel_activity`.
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }
}

impl<R: DeserializeOwned> Future for ActivityFuture<R> {
    type Output = Result<R, TidalError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take().map(decode_outcome)
    }
}

/// Future resolving when a timer fires or is cancelled
pub struct TimerFuture {
    slot: CompletionSlot,
    timer_id: String,
}

impl TimerFuture {
    /// Id of the timer, usable with `cancel_timer`.
    pub fn timer_id(&self) -> &str {
        &self.timer_id
    }
}

impl Future for TimerFuture {
    type Output = Result<(), TidalError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take().map(|(_, err)| match err {
            Some(err) => Err(err),
            None => Ok(()),
        })
    }
}

/// Future resolving to a child workflow's typed result
pub struct ChildWorkflowFuture<R> {
    slot: CompletionSlot,
    execution: Arc<Mutex<Option<WorkflowExecution>>>,
    _result: PhantomData<fn() -> R>,
}

impl<R> ChildWorkflowFuture<R> {
    /// The child's execution identity; available as soon as the child is
    /// scheduled, before it completes.
    pub fn execution(&self) -> Option<WorkflowExecution> {
        self.execution.lock().unwrap().clone()
    }
}

impl<R: DeserializeOwned> Future for ChildWorkflowFuture<R> {
    type Output = Result<R, TidalError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.slot.poll_take().map(decode_outcome)
    }
}

/// Future resolving once cancellation of the workflow has been requested
pub struct CancelledFuture {
    cancelled: Arc<AtomicBool>,
}

impl Future for CancelledFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.cancelled.load(Ordering::SeqCst) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

type SignalQueues = Arc<Mutex<HashMap<String, VecDeque<Option<Vec<u8>>>>>>;

/// Channel of signals delivered to the workflow under a given name
pub struct SignalChannel {
    signal_name: String,
    queues: SignalQueues,
}

impl SignalChannel {
    /// Receive the next signal payload, suspending until one arrives.
    pub fn recv(&self) -> SignalFuture {
        SignalFuture {
            signal_name: self.signal_name.clone(),
            queues: self.queues.clone(),
        }
    }

    /// Take a pending signal payload without suspending.
    pub fn try_recv(&self) -> Option<Option<Vec<u8>>> {
        let mut queues = self.queues.lock().unwrap();
        queues.get_mut(&self.signal_name).and_then(|q| q.pop_front())
    }
}

/// Future returned by `SignalChannel::recv()`
pub struct SignalFuture {
    signal_name: String,
    queues: SignalQueues,
}

impl Future for SignalFuture {
    type Output = Option<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut queues = self.queues.lock().unwrap();
        match queues.get_mut(&self.signal_name).and_then(|q| q.pop_front()) {
            Some(payload) => Poll::Ready(payload),
            None => Poll::Pending,
        }
    }
}

/// Options for scheduling an activity from workflow code
#[derive(Debug, Clone, Default)]
pub struct ActivityCallOptions {
    /// Explicit activity id; minted by the host when absent
    pub activity_id: Option<String>,
    /// Task list override; defaults to the workflow's task list
    pub task_list: Option<String>,
    pub schedule_to_close_timeout: Duration,
    pub start_to_close_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

/// Options for starting a child workflow
#[derive(Debug, Clone, Default)]
pub struct ChildWorkflowCallOptions {
    /// Child workflow id; defaulted by the host when absent
    pub workflow_id: Option<String>,
    /// Domain override; defaults to the parent's domain
    pub domain: Option<String>,
    /// Task list override; defaults to the parent's task list
    pub task_list: Option<String>,
    pub execution_start_to_close_timeout: Option<Duration>,
    pub task_start_to_close_timeout: Option<Duration>,
}

type QueryFn = Box<dyn Fn(Option<Vec<u8>>) -> Result<Option<Vec<u8>>, TidalError> + Send>;

/// State shared between the context handed to workflow code and the master
/// handlers registered with the environment.
pub(crate) struct ContextState {
    signals: SignalQueues,
    query_handlers: Mutex<HashMap<String, QueryFn>>,
    cancelled: Arc<AtomicBool>,
    pending_tasks: Arc<Mutex<Vec<WorkflowTask>>>,
    task_sequence: Arc<AtomicU64>,
}

impl ContextState {
    pub(crate) fn push_signal(&self, name: &str, input: Option<Vec<u8>>) {
        self.signals
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(input);
    }

    pub(crate) fn dispatch_query(
        &self,
        query_type: &str,
        args: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, TidalError> {
        let handlers = self.query_handlers.lock().unwrap();
        match handlers.get(query_type) {
            Some(handler) => handler(args),
            None => Err(TidalError::Generic(tidal_core::GenericError::new(format!(
                "unknown query type: {query_type}"
            )))),
        }
    }

    pub(crate) fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Workflow context for executing workflow logic
#[derive(Clone)]
pub struct WorkflowContext {
    env: Arc<dyn WorkflowEnvironment>,
    state: Arc<ContextState>,
}

impl WorkflowContext {
    pub(crate) fn new(
        env: Arc<dyn WorkflowEnvironment>,
        pending_tasks: Arc<Mutex<Vec<WorkflowTask>>>,
        task_sequence: Arc<AtomicU64>,
    ) -> Self {
        Self {
            env,
            state: Arc::new(ContextState {
                signals: Arc::new(Mutex::new(HashMap::new())),
                query_handlers: Mutex::new(HashMap::new()),
                cancelled: Arc::new(AtomicBool::new(false)),
                pending_tasks,
                task_sequence,
            }),
        }
    }

    pub(crate) fn state(&self) -> Arc<ContextState> {
        self.state.clone()
    }

    /// Get workflow information
    pub fn workflow_info(&self) -> WorkflowInfo {
        self.env.workflow_info()
    }

    /// Current workflow time (deterministic)
    pub fn now(&self) -> DateTime<Utc> {
        self.env.now()
    }

    /// Schedule an activity. The activity starts immediately; awaiting the
    /// returned future suspends until its result is delivered.
    pub fn execute_activity<A, R>(&self, activity_type: &str, args: A) -> ActivityFuture<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.execute_activity_with_options(activity_type, args, ActivityCallOptions::default())
    }

    pub fn execute_activity_with_options<A, R>(
        &self,
        activity_type: &str,
        args: A,
        options: ActivityCallOptions,
    ) -> ActivityFuture<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let input = match encode_args(&args) {
            Ok(bytes) => Some(bytes),
            Err(e) => panic!("unable to encode arguments for activity {activity_type}: {e}"),
        };
        let info = self.env.workflow_info();
        let params = ExecuteActivityParams {
            activity_id: options.activity_id,
            activity_type: tidal_core::ActivityType::new(activity_type),
            input,
            task_list: options.task_list.unwrap_or(info.task_list),
            schedule_to_close_timeout: options.schedule_to_close_timeout,
            start_to_close_timeout: options.start_to_close_timeout,
            heartbeat_timeout: options.heartbeat_timeout,
        };
        let slot = CompletionSlot::new();
        let activity_id = self.env.execute_activity(params, slot.handler());
        ActivityFuture {
            slot,
            activity_id,
            _result: PhantomData,
        }
    }

    /// Request cancellation of a previously scheduled activity. The pending
    /// result future resolves to a canceled error.
    pub fn cancel_activity(&self, activity_id: &str) {
        self.env.request_cancel_activity(activity_id);
    }

    /// Start a timer. Awaiting the returned future suspends until the timer
    /// fires (or resolves to a canceled error if the timer is cancelled).
    pub fn new_timer(&self, duration: Duration) -> TimerFuture {
        let slot = CompletionSlot::new();
        let timer_id = self.env.new_timer(duration, slot.handler());
        TimerFuture { slot, timer_id }
    }

    /// Sleep for a duration of workflow time.
    pub fn sleep(&self, duration: Duration) -> TimerFuture {
        self.new_timer(duration)
    }

    pub fn cancel_timer(&self, timer_id: &str) {
        self.env.request_cancel_timer(timer_id);
    }

    /// Start a child workflow. The child is scheduled immediately; awaiting
    /// the returned future suspends until it completes.
    pub fn execute_child_workflow<A, R>(
        &self,
        workflow_type: &str,
        args: A,
        options: ChildWorkflowCallOptions,
    ) -> ChildWorkflowFuture<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let input = match encode_args(&args) {
            Ok(bytes) => Some(bytes),
            Err(e) => panic!("unable to encode arguments for child workflow {workflow_type}: {e}"),
        };
        let info = self.env.workflow_info();
        let params = ChildWorkflowParams {
            workflow_id: options.workflow_id.unwrap_or_default(),
            workflow_type: tidal_core::WorkflowType::new(workflow_type),
            input,
            domain: options.domain.unwrap_or(info.domain),
            task_list: options.task_list.unwrap_or(info.task_list),
            execution_start_to_close_timeout: options
                .execution_start_to_close_timeout
                .unwrap_or(info.execution_start_to_close_timeout),
            task_start_to_close_timeout: options
                .task_start_to_close_timeout
                .unwrap_or(info.task_start_to_close_timeout),
        };

        let slot = CompletionSlot::new();
        let execution = Arc::new(Mutex::new(None));
        let started = {
            let execution = execution.clone();
            Box::new(move |exec: WorkflowExecution| {
                *execution.lock().unwrap() = Some(exec);
            })
        };
        if let Err(err) = self
            .env
            .execute_child_workflow(params, slot.handler(), started)
        {
            slot.complete(None, Some(err));
        }
        ChildWorkflowFuture {
            slot,
            execution,
            _result: PhantomData,
        }
    }

    /// Request cancellation of another workflow by id (typically a child of
    /// this workflow).
    pub fn request_cancel_workflow(&self, workflow_id: &str) -> Result<(), TidalError> {
        let info = self.env.workflow_info();
        self.env.request_cancel_workflow(&info.domain, workflow_id, "")
    }

    /// Get a channel of signals delivered under `signal_name`.
    pub fn signal_channel(&self, signal_name: &str) -> SignalChannel {
        SignalChannel {
            signal_name: signal_name.to_string(),
            queues: self.state.signals.clone(),
        }
    }

    /// Resolves once cancellation of this workflow has been requested.
    pub fn cancelled(&self) -> CancelledFuture {
        CancelledFuture {
            cancelled: self.state.cancelled.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Execute a side effect: run `f` once and record its result. In the
    /// test environment the function simply runs on the spot.
    pub fn side_effect<R, F>(&self, f: F) -> Result<R, TidalError>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> R + Send + 'static,
    {
        let slot = CompletionSlot::new();
        self.env.side_effect(
            Box::new(move || {
                let value = f();
                tidal_core::encode_arg(&value)
                    .map_err(|e| TidalError::Serialization(e.to_string()))
            }),
            slot.handler(),
        );
        match slot.poll_take() {
            Poll::Ready(outcome) => decode_outcome(outcome),
            // side effects are delivered synchronously on the calling thread
            Poll::Pending => Err(TidalError::Generic(tidal_core::GenericError::new(
                "side effect did not complete synchronously",
            ))),
        }
    }

    /// Get a version for backwards-compatible workflow changes.
    pub fn get_version(&self, change_id: &str, min_supported: i32, max_supported: i32) -> i32 {
        self.env.get_version(change_id, min_supported, max_supported)
    }

    /// Set a handler for queries of `query_type`.
    pub fn set_query_handler<A, R, F>(&self, query_type: &str, handler: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, TidalError> + Send + 'static,
    {
        let mut handlers = self.state.query_handlers.lock().unwrap();
        handlers.insert(
            query_type.to_string(),
            Box::new(move |args| {
                let decoded: A = tidal_core::decode_args(args.as_deref())
                    .map_err(|e| TidalError::Serialization(e.to_string()))?;
                let result = handler(decoded)?;
                let encoded = tidal_core::encode_arg(&result)
                    .map_err(|e| TidalError::Serialization(e.to_string()))?;
                Ok(Some(encoded))
            }),
        );
    }

    /// Spawn a concurrent workflow task. It is scheduled deterministically by
    /// the dispatcher alongside the main workflow task.
    pub fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.state.task_sequence.fetch_add(1, Ordering::SeqCst);
        self.state
            .pending_tasks
            .lock()
            .unwrap()
            .push(WorkflowTask::new(id, name, future));
    }

    /// Build the error that requests this workflow continue as a new run.
    /// Return it from the workflow function to hand off.
    pub fn continue_as_new_error<A: Serialize>(&self, args: A) -> TidalError {
        let info = self.env.workflow_info();
        let input = match encode_args(&args) {
            Ok(bytes) => bytes,
            Err(e) => panic!("unable to encode continue-as-new arguments: {e}"),
        };
        TidalError::ContinueAsNew(ContinueAsNewError {
            workflow_type: info.workflow_type.name,
            task_list: info.task_list,
            input,
            execution_start_to_close_timeout: info.execution_start_to_close_timeout,
            task_start_to_close_timeout: info.task_start_to_close_timeout,
        })
    }
}
