//! The workflow test environment.
//!
//! One [`TestWorkflowEnvironment`] drives one workflow execution (plus its
//! descendants) to completion on a single-threaded main loop. The root
//! environment owns the shared scheduling state: the callback queue the loop
//! drains, the mock clock, the registries of live timers, activities and
//! child workflows, and the count of work running outside the loop. Child
//! environments share that state and are serviced by the root's loop.
//!
//! Scheduling policy: callbacks are always drained before virtual time moves;
//! when the loop is idle and nothing runs in the background, the mock clock
//! jumps to the next pending timer; while background work is in flight, a
//! wall-clock guard paces the timer instead so background completions can
//! interleave as they would in production.

use crate::clock::{MockClock, MockTimer};
use crate::mock::{MockKind, MockRegistry, MockResolved, MockReturns};
use crate::{
    DEFAULT_TEST_DOMAIN, DEFAULT_TEST_RUN_ID, DEFAULT_TEST_TASK_LIST, DEFAULT_TEST_TIMEOUT,
    DEFAULT_TEST_WORKFLOW_ID, QUERY_TYPE_STACK_TRACE,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tidal_activity::{Activity, ActivityContext, ActivityError, ActivityRuntime};
use tidal_core::{
    construct_error, encode_args, factory, to_positional_values, ActivityInfo, CanceledError,
    ChildWorkflowParams, EncodedValue, EncodedValues, ExecuteActivityParams, GenericError,
    TidalError, WorkerOptions, WorkflowExecution, WorkflowInfo, WorkflowType, REASON_GENERIC,
};
use tidal_worker::{
    ActivityProvider, ActivityTask, ActivityTaskHandler, ActivityTaskResponse, Registry,
    ReturnMetadata, WorkflowEntry,
};
use tidal_workflow::channel as wf_channel;
use tidal_workflow::{
    CancelHandler, FunctionWorkflowDefinition, QueryHandler, ResultHandler, SignalHandler,
    StartedHandler, WorkflowDefinition, WorkflowFunction,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CALLBACK_QUEUE_CAPACITY: usize = 1024;

type ActivityStartedFn = Box<dyn FnMut(&ActivityInfo, &EncodedValues) + Send>;
type ActivityCompletedFn =
    Box<dyn FnMut(&ActivityInfo, Option<&EncodedValue>, Option<&TidalError>) + Send>;
type ActivityCanceledFn = Box<dyn FnMut(&ActivityInfo) + Send>;
type ActivityHeartbeatFn = Box<dyn FnMut(&ActivityInfo, &EncodedValues) + Send>;
type ChildWorkflowStartedFn = Box<dyn FnMut(&WorkflowInfo, &EncodedValues) + Send>;
type ChildWorkflowCompletedFn =
    Box<dyn FnMut(&WorkflowInfo, Option<&EncodedValue>, Option<&TidalError>) + Send>;
type ChildWorkflowCanceledFn = Box<dyn FnMut(&WorkflowInfo) + Send>;
type TimerScheduledFn = Box<dyn FnMut(&str, Duration) + Send>;
type TimerIdFn = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct TestListeners {
    on_activity_started: Option<ActivityStartedFn>,
    on_activity_completed: Option<ActivityCompletedFn>,
    on_activity_canceled: Option<ActivityCanceledFn>,
    on_activity_heartbeat: Option<ActivityHeartbeatFn>,
    on_child_workflow_started: Option<ChildWorkflowStartedFn>,
    on_child_workflow_completed: Option<ChildWorkflowCompletedFn>,
    on_child_workflow_canceled: Option<ChildWorkflowCanceledFn>,
    on_timer_scheduled: Option<TimerScheduledFn>,
    on_timer_fired: Option<TimerIdFn>,
    on_timer_cancelled: Option<TimerIdFn>,
}

/// One unit of work for the main loop.
struct CallbackItem {
    callback: Box<dyn FnOnce() + Send>,
    /// Nudge the owning environment's dispatcher after the callback runs
    start_decision_task: bool,
    env: Weak<EnvInner>,
}

impl CallbackItem {
    fn process(self) {
        (self.callback)();
        if self.start_decision_task {
            if let Some(env) = self.env.upgrade() {
                env.start_decision_task();
            }
        }
    }
}

struct TimerHandle {
    env: Weak<EnvInner>,
    callback: Option<ResultHandler>,
    duration: Duration,
    mock_time_to_fire: DateTime<Utc>,
    wall_time_to_fire: Option<Instant>,
    timer: MockTimer,
    wall_timer: Option<JoinHandle<()>>,
    id_int: u64,
}

struct ActivityHandle {
    callback: Option<ResultHandler>,
    activity_type: String,
}

struct ChildWorkflowHandle {
    env: Arc<EnvInner>,
    callback: Option<ResultHandler>,
}

#[derive(Default)]
struct SchedulerState {
    counter: u64,
    timers: HashMap<String, TimerHandle>,
    activities: HashMap<String, ActivityHandle>,
    child_workflows: HashMap<String, ChildWorkflowHandle>,
    /// activity name -> task lists it is restricted to
    task_list_activities: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
struct TestOutcome {
    result: Option<Vec<u8>>,
    error: Option<TidalError>,
}

/// Scheduling state owned by the root environment and shared by its
/// descendants.
struct SharedEnvState {
    callback_tx: mpsc::SyncSender<CallbackItem>,
    callback_rx: Mutex<mpsc::Receiver<CallbackItem>>,
    mock_clock: MockClock,
    scheduler: Mutex<SchedulerState>,
    /// Activities and child workflows currently in flight outside the loop
    running_count: AtomicI32,
    mocks: MockRegistry,
    listeners: Mutex<TestListeners>,
    test_timeout: Mutex<Duration>,
    worker_options: Mutex<WorkerOptions>,
    registry: Registry,
    runtime: tokio::runtime::Runtime,
}

struct EnvInner {
    self_weak: Weak<EnvInner>,
    shared: Arc<SharedEnvState>,
    parent: Option<Weak<EnvInner>>,

    workflow_info: Mutex<WorkflowInfo>,
    workflow_def: Mutex<Option<Box<dyn WorkflowDefinition>>>,
    change_versions: Mutex<HashMap<String, i32>>,

    cancel_handler: Mutex<Option<CancelHandler>>,
    signal_handler: Mutex<Option<SignalHandler>>,
    query_handler: Mutex<Option<QueryHandler>>,

    completed: AtomicBool,
    outcome: Mutex<TestOutcome>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl EnvInner {
    fn arc(&self) -> Arc<EnvInner> {
        self.self_weak
            .upgrade()
            .expect("test environment dropped while in use")
    }

    fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    fn next_id(&self) -> u64 {
        let mut st = self.shared.scheduler.lock().unwrap();
        let id = st.counter;
        st.counter += 1;
        id
    }

    fn post_callback(&self, callback: impl FnOnce() + Send + 'static, start_decision_task: bool) {
        let item = CallbackItem {
            callback: Box::new(callback),
            start_decision_task,
            env: self.self_weak.clone(),
        };
        // blocking send applies backpressure on runaway producers
        let _ = self.shared.callback_tx.send(item);
    }

    /// Fail the test from a background thread: the message is raised as a
    /// panic on the main loop, where the test observes it.
    fn post_panic(&self, message: String) {
        self.post_callback(move || panic!("{message}"), false);
    }

    fn start_decision_task(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        let mut def = self.workflow_def.lock().unwrap();
        if let Some(def) = def.as_mut() {
            def.on_decision_task_started();
        }
    }

    fn workflow_stack_trace(&self) -> String {
        match self.workflow_def.lock().unwrap().as_ref() {
            Some(def) => def.stack_trace(),
            None => "workflow not started".to_string(),
        }
    }

    /// Drive the root environment until the test completes or the wall-clock
    /// test timeout elapses.
    fn start_main_loop(&self) {
        let rx = self.shared.callback_rx.lock().unwrap();
        loop {
            match rx.try_recv() {
                Ok(item) => item.process(),
                Err(TryRecvError::Empty) => {
                    // nothing pending: consider advancing virtual time
                    if !self.auto_fire_next_timer() {
                        if self.completed.load(Ordering::SeqCst) {
                            return;
                        }
                        let timeout = *self.shared.test_timeout.lock().unwrap();
                        match rx.recv_timeout(timeout) {
                            Ok(item) => item.process(),
                            Err(RecvTimeoutError::Timeout) => {
                                panic!(
                                    "test timeout: {:?}, workflow stack: {}",
                                    timeout,
                                    self.workflow_stack_trace()
                                );
                            }
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                }
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    /// Attempt to fire the next pending timer. Returns whether virtual time
    /// advanced.
    fn auto_fire_next_timer(&self) -> bool {
        enum Plan {
            Advance(Duration),
            Arm {
                timer_id: String,
                duration: Duration,
                env: Weak<EnvInner>,
            },
            Keep,
        }

        let plan = {
            let mut st = self.shared.scheduler.lock().unwrap();
            if st.timers.is_empty() {
                return false;
            }
            let next_id = st
                .timers
                .iter()
                .min_by_key(|(_, t)| (t.mock_time_to_fire, t.id_int))
                .map(|(id, _)| id.clone())
                .unwrap();
            let now_mock = self.shared.mock_clock.now();
            let th = st.timers.get_mut(&next_id).unwrap();
            let duration_to_fire = (th.mock_time_to_fire - now_mock).to_std().unwrap_or_default();

            if self.shared.running_count.load(Ordering::SeqCst) == 0 {
                if let Some(guard) = th.wall_timer.take() {
                    guard.abort();
                    th.wall_time_to_fire = None;
                }
                tracing::debug!(
                    timer_id = %next_id,
                    duration = ?th.duration,
                    skipped = ?duration_to_fire,
                    "auto firing timer"
                );
                Plan::Advance(duration_to_fire)
            } else {
                let wall_time_to_fire = Instant::now() + duration_to_fire;
                let earlier_guard = th
                    .wall_time_to_fire
                    .map(|t| t < wall_time_to_fire)
                    .unwrap_or(false);
                if th.wall_timer.is_some() && earlier_guard {
                    // a guard armed while earlier work was running fires
                    // sooner than this computation; keep it
                    Plan::Keep
                } else {
                    if let Some(guard) = th.wall_timer.take() {
                        guard.abort();
                    }
                    th.wall_time_to_fire = Some(wall_time_to_fire);
                    Plan::Arm {
                        timer_id: next_id,
                        duration: duration_to_fire,
                        env: th.env.clone(),
                    }
                }
            }
        };

        match plan {
            Plan::Advance(skip) => {
                // firing happens inside the advance: the timer callback
                // removes its handle and enqueues the user callback
                self.shared.mock_clock.advance(skip);
                true
            }
            Plan::Keep => false,
            Plan::Arm {
                timer_id,
                duration,
                env,
            } => {
                let guard_timer_id = timer_id.clone();
                let guard = self.shared.runtime.spawn(async move {
                    tokio::time::sleep(duration).await;
                    if let Some(env) = env.upgrade() {
                        let fire_env = env.clone();
                        env.post_callback(
                            move || {
                                let skip = {
                                    let st = fire_env.shared.scheduler.lock().unwrap();
                                    st.timers.get(&guard_timer_id).map(|t| {
                                        (t.mock_time_to_fire - fire_env.shared.mock_clock.now())
                                            .to_std()
                                            .unwrap_or_default()
                                    })
                                };
                                if let Some(skip) = skip {
                                    fire_env.shared.mock_clock.advance(skip);
                                }
                            },
                            true,
                        );
                    }
                });
                let mut st = self.shared.scheduler.lock().unwrap();
                if let Some(th) = st.timers.get_mut(&timer_id) {
                    th.wall_timer = Some(guard);
                }
                false
            }
        }
    }

    fn new_timer_impl(
        &self,
        duration: Duration,
        callback: ResultHandler,
        notify_listener: bool,
    ) -> String {
        let id_int = self.next_id();
        let timer_id = id_int.to_string();

        let weak = self.self_weak.clone();
        let fire_id = timer_id.clone();
        let mock_timer = self.shared.mock_clock.after_fn(
            duration,
            Box::new(move || {
                // runs on the main loop, inside a clock advance
                let Some(env) = weak.upgrade() else { return };
                let removed = env.shared.scheduler.lock().unwrap().timers.remove(&fire_id);
                if let Some(mut handle) = removed {
                    if let Some(guard) = handle.wall_timer.take() {
                        guard.abort();
                    }
                    let cb = handle.callback.take();
                    let listener_env = env.clone();
                    let listener_id = fire_id.clone();
                    env.post_callback(
                        move || {
                            if let Some(cb) = cb {
                                cb(None, None);
                            }
                            if notify_listener {
                                listener_env.notify_timer_fired(&listener_id);
                            }
                        },
                        true,
                    );
                }
            }),
        );

        let mock_time_to_fire = self.shared.mock_clock.now()
            + chrono::Duration::from_std(duration).expect("timer duration out of range");
        self.shared.scheduler.lock().unwrap().timers.insert(
            timer_id.clone(),
            TimerHandle {
                env: self.self_weak.clone(),
                callback: Some(callback),
                duration,
                mock_time_to_fire,
                wall_time_to_fire: None,
                timer: mock_timer,
                wall_timer: None,
                id_int,
            },
        );
        if notify_listener {
            self.notify_timer_scheduled(&timer_id, duration);
        }
        timer_id
    }

    /// Arrange for `f` to run on the main loop after `delay` of virtual
    /// time. The timer is invisible to timer listeners.
    fn register_delayed_callback_impl(&self, f: impl FnOnce() + Send + 'static, delay: Duration) {
        let env = self.arc();
        self.post_callback(
            move || {
                env.new_timer_impl(delay, Box::new(move |_result, _err| f()), false);
            },
            false,
        );
    }

    fn get_activity_info(&self, activity_id: &str, activity_type: &str) -> ActivityInfo {
        ActivityInfo {
            activity_id: activity_id.to_string(),
            activity_type: tidal_core::ActivityType::new(activity_type),
            task_token: activity_id.as_bytes().to_vec(),
            workflow_execution: self.workflow_info.lock().unwrap().workflow_execution.clone(),
        }
    }

    fn handle_activity_result(
        &self,
        activity_id: &str,
        response: ActivityTaskResponse,
        activity_type: &str,
    ) {
        tracing::debug!(activity_id, activity_type, "handling activity result");
        let info = self.get_activity_info(activity_id, activity_type);

        if matches!(response, ActivityTaskResponse::Pending) {
            // outcome arrives later through complete_activity; keep the handle
            self.notify_activity_completed(&info, None, Some(&TidalError::ResultPending));
            return;
        }

        let removed = self
            .shared
            .scheduler
            .lock()
            .unwrap()
            .activities
            .remove(activity_id);
        let Some(mut handle) = removed else {
            tracing::debug!(activity_id, "activity already completed or cancelled");
            return;
        };
        let cb = handle.callback.take();

        let (blob, err) = match response {
            ActivityTaskResponse::Completed { result } => (result, None),
            ActivityTaskResponse::Canceled { details } => (
                None,
                Some(TidalError::Canceled(CanceledError::new(
                    details.unwrap_or_default(),
                ))),
            ),
            ActivityTaskResponse::Failed { reason, details } => {
                (None, Some(construct_error(&reason, details.unwrap_or_default())))
            }
            ActivityTaskResponse::Pending => unreachable!("pending handled above"),
        };

        if let Some(cb) = cb {
            cb(blob.clone(), err.clone());
        }
        let encoded = blob.map(EncodedValue::new);
        self.notify_activity_completed(&info, encoded.as_ref(), err.as_ref());
        self.start_decision_task();
    }

    fn new_test_activity_task_handler(&self, task_list: &str) -> ActivityTaskHandler {
        let registry = self.shared.registry.clone();
        if registry.registered_activities().is_empty() {
            panic!("no activity is registered for task list '{task_list}'");
        }
        let weak = self.self_weak.clone();
        let task_list = task_list.to_string();
        let provider: ActivityProvider = Box::new(move |name| {
            let env = weak.upgrade()?;
            {
                let st = env.shared.scheduler.lock().unwrap();
                if let Some(allowed) = st.task_list_activities.get(name) {
                    if !allowed.contains(&task_list) {
                        // bound to specific task lists, none of them this one
                        return None;
                    }
                }
            }
            let entry = env.shared.registry.get_activity(name)?;
            Some(Arc::new(ActivityExecutorWrapper {
                env: weak.clone(),
                name: name.to_string(),
                real: entry.activity,
                metadata: entry.metadata,
            }) as Arc<dyn Activity>)
        });
        let identity = self.shared.worker_options.lock().unwrap().identity.clone();
        ActivityTaskHandler::with_provider(registry, identity, provider)
    }

    fn resolve_workflow_definition(
        &self,
        workflow_type: &str,
    ) -> Result<Box<dyn WorkflowDefinition>, String> {
        let entry = self
            .shared
            .registry
            .get_workflow_fn(workflow_type)
            .ok_or_else(|| {
                format!(
                    "unable to find workflow type: {workflow_type}. Supported types: [{}]",
                    self.shared.registry.registered_workflow_types().join(", ")
                )
            })?;
        let wrapper: Arc<dyn WorkflowFunction> = Arc::new(WorkflowExecutorWrapper {
            env: self.self_weak.clone(),
            name: workflow_type.to_string(),
            real: entry.function,
            metadata: entry.metadata,
        });
        Ok(Box::new(FunctionWorkflowDefinition::new(
            self.arc(),
            workflow_type,
            wrapper,
        )))
    }

    /// Root-environment entry: resolve the workflow, start it on the main
    /// loop, and drive the loop until completion.
    fn execute_workflow_by_name(&self, workflow_type: &str, input: Option<Vec<u8>>) {
        let resolved = self
            .shared
            .registry
            .workflow_alias(workflow_type)
            .unwrap_or_else(|| workflow_type.to_string());
        self.workflow_info.lock().unwrap().workflow_type = WorkflowType::new(resolved.clone());

        match self.resolve_workflow_definition(&resolved) {
            Ok(def) => *self.workflow_def.lock().unwrap() = Some(def),
            Err(msg) => panic!("{msg}"),
        }

        let env = self.arc();
        self.post_callback(
            move || {
                let mut def = env.workflow_def.lock().unwrap();
                if let Some(def) = def.as_mut() {
                    def.execute(input);
                }
            },
            false,
        );
        self.start_main_loop();
    }

    /// Child-environment entry: runs on a background task, schedules the
    /// child's start on the shared main loop, and parks until completion.
    async fn execute_workflow_background(self: Arc<Self>, workflow_type: String, input: Option<Vec<u8>>) {
        match self.resolve_workflow_definition(&workflow_type) {
            Ok(def) => *self.workflow_def.lock().unwrap() = Some(def),
            Err(msg) => {
                self.post_panic(msg);
                return;
            }
        }

        let env = self.clone();
        self.post_callback(
            move || {
                let mut def = env.workflow_def.lock().unwrap();
                if let Some(def) = def.as_mut() {
                    def.execute(input);
                }
            },
            false,
        );

        let done = self.done_rx.lock().unwrap().take();
        if let Some(done) = done {
            let _ = done.await;
        }
    }

    fn new_child_env(
        &self,
        params: &ChildWorkflowParams,
        callback: ResultHandler,
    ) -> Arc<EnvInner> {
        let workflow_id = if params.workflow_id.is_empty() {
            let parent_run_id = self
                .workflow_info
                .lock()
                .unwrap()
                .workflow_execution
                .run_id
                .clone();
            format!("{}_{}", parent_run_id, self.next_id())
        } else {
            params.workflow_id.clone()
        };

        let info = WorkflowInfo {
            workflow_execution: WorkflowExecution::new(
                workflow_id.clone(),
                format!("{workflow_id}_RunID"),
            ),
            workflow_type: params.workflow_type.clone(),
            domain: params.domain.clone(),
            task_list: params.task_list.clone(),
            execution_start_to_close_timeout: params.execution_start_to_close_timeout,
            task_start_to_close_timeout: params.task_start_to_close_timeout,
        };

        let (done_tx, done_rx) = oneshot::channel();
        let child = Arc::new_cyclic(|weak: &Weak<EnvInner>| EnvInner {
            self_weak: weak.clone(),
            shared: self.shared.clone(),
            parent: Some(self.self_weak.clone()),
            workflow_info: Mutex::new(info),
            workflow_def: Mutex::new(None),
            change_versions: Mutex::new(HashMap::new()),
            cancel_handler: Mutex::new(None),
            signal_handler: Mutex::new(None),
            query_handler: Mutex::new(None),
            completed: AtomicBool::new(false),
            outcome: Mutex::new(TestOutcome::default()),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
        });

        self.shared.scheduler.lock().unwrap().child_workflows.insert(
            workflow_id,
            ChildWorkflowHandle {
                env: child.clone(),
                callback: Some(callback),
            },
        );
        child
    }

    /// Post a callback that requests cancellation of this environment's own
    /// workflow, so the cancel handler runs in a main-loop turn.
    fn cancel_workflow_via_callback(&self) {
        let env = self.arc();
        self.post_callback(
            move || {
                let info = env.workflow_info.lock().unwrap().clone();
                let _ = tidal_workflow::WorkflowEnvironment::request_cancel_workflow(
                    env.as_ref(),
                    &info.domain,
                    &info.workflow_execution.workflow_id,
                    &info.workflow_execution.run_id,
                );
            },
            true,
        );
    }

    /// Resolve the configured mock for an invocation, honoring the
    /// wait-duration and side-effect hooks. Runs on a background task.
    async fn get_mock_return(
        self: Arc<Self>,
        kind: MockKind,
        name: &str,
        input: &Option<Vec<u8>>,
    ) -> Option<MockResolved> {
        if !self.shared.mocks.is_mocked(kind, name) {
            return None;
        }

        let args: Vec<Value> = match to_positional_values(input.as_deref()) {
            Ok(args) => args,
            Err(e) => {
                self.post_panic(format!("unable to decode arguments for mocked {name}: {e}"));
                return None;
            }
        };

        let resolved = match self.shared.mocks.consume(kind, name, &args) {
            Ok(resolved) => resolved,
            Err(msg) => {
                self.post_panic(msg);
                return None;
            }
        };

        if !resolved.wait.is_zero() {
            // suspend on workflow time: this invocation is now blocked, not
            // background-running, so the clock may advance past the wait
            let (tx, rx) = oneshot::channel::<()>();
            let shared = self.shared.clone();
            self.register_delayed_callback_impl(
                move || {
                    shared.running_count.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(());
                },
                resolved.wait,
            );
            self.shared.running_count.fetch_sub(1, Ordering::SeqCst);
            let _ = rx.await;
        }

        if let Some(run_fn) = &resolved.run_fn {
            run_fn(&EncodedValues::new(input.clone().unwrap_or_default()));
        }

        Some(resolved)
    }

    /// Validate a literal mock return against the real function's return
    /// shape and encode it.
    fn mock_values_outcome(
        name: &str,
        metadata: &ReturnMetadata,
        result: Option<Value>,
        error: Option<TidalError>,
    ) -> Result<(Option<Vec<u8>>, Option<TidalError>), String> {
        match result {
            None => {
                if metadata.returns_value {
                    return Err(format!(
                        "mock of {name} has incorrect number of returns: the function returns \
                         a result and an error, but only an error was configured"
                    ));
                }
                Ok((None, error))
            }
            Some(value) => {
                if !metadata.returns_value {
                    return Err(format!(
                        "mock of {name} has incorrect number of returns: the function only \
                         returns an error, but a result was configured"
                    ));
                }
                if let Err(e) = (metadata.validate_result)(&value) {
                    return Err(format!(
                        "mock of {name} has incorrect return type: value {value} is not \
                         assignable to the function's return type: {e}"
                    ));
                }
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| format!("encode result from mock of {name} failed: {e}"))?;
                Ok((Some(bytes), error))
            }
        }
    }

    fn notify_timer_scheduled(&self, timer_id: &str, duration: Duration) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_timer_scheduled
            .as_mut()
        {
            listener(timer_id, duration);
        }
    }

    fn notify_timer_fired(&self, timer_id: &str) {
        if let Some(listener) = self.shared.listeners.lock().unwrap().on_timer_fired.as_mut() {
            listener(timer_id);
        }
    }

    fn notify_timer_cancelled(&self, timer_id: &str) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_timer_cancelled
            .as_mut()
        {
            listener(timer_id);
        }
    }

    fn notify_activity_started(&self, info: &ActivityInfo, args: &EncodedValues) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_started
            .as_mut()
        {
            listener(info, args);
        }
    }

    fn notify_activity_completed(
        &self,
        info: &ActivityInfo,
        result: Option<&EncodedValue>,
        err: Option<&TidalError>,
    ) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_completed
            .as_mut()
        {
            listener(info, result, err);
        }
    }

    fn notify_activity_canceled(&self, info: &ActivityInfo) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_canceled
            .as_mut()
        {
            listener(info);
        }
    }

    fn notify_activity_heartbeat(&self, info: &ActivityInfo, details: &EncodedValues) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_heartbeat
            .as_mut()
        {
            listener(info, details);
        }
    }

    fn notify_child_workflow_started(&self, info: &WorkflowInfo, args: &EncodedValues) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_started
            .as_mut()
        {
            listener(info, args);
        }
    }

    fn notify_child_workflow_completed(
        &self,
        info: &WorkflowInfo,
        result: Option<&EncodedValue>,
        err: Option<&TidalError>,
    ) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_completed
            .as_mut()
        {
            listener(info, result, err);
        }
    }

    fn notify_child_workflow_canceled(&self, info: &WorkflowInfo) {
        if let Some(listener) = self
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_canceled
            .as_mut()
        {
            listener(info);
        }
    }
}

impl tidal_workflow::WorkflowEnvironment for EnvInner {
    fn workflow_info(&self) -> WorkflowInfo {
        self.workflow_info.lock().unwrap().clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.shared.mock_clock.now()
    }

    fn new_timer(&self, duration: Duration, callback: ResultHandler) -> String {
        self.new_timer_impl(duration, callback, true)
    }

    fn request_cancel_timer(&self, timer_id: &str) {
        tracing::debug!(timer_id, "request cancel timer");
        let removed = self.shared.scheduler.lock().unwrap().timers.remove(timer_id);
        let Some(mut handle) = removed else {
            tracing::debug!(timer_id, "cancel failed, timer does not exist");
            return;
        };
        handle.timer.stop();
        if let Some(guard) = handle.wall_timer.take() {
            guard.abort();
        }
        let cb = handle.callback.take();
        let env = self.arc();
        let timer_id = timer_id.to_string();
        self.post_callback(
            move || {
                if let Some(cb) = cb {
                    cb(None, Some(factory::canceled_error()));
                }
                env.notify_timer_cancelled(&timer_id);
            },
            true,
        );
    }

    fn execute_activity(&self, params: ExecuteActivityParams, callback: ResultHandler) -> String {
        let activity_id = params
            .activity_id
            .clone()
            .unwrap_or_else(|| self.next_id().to_string());
        let activity_type = params.activity_type.name.clone();
        tracing::debug!(activity_id = %activity_id, activity_type = %activity_type, "execute activity");

        let task = ActivityTask {
            workflow_execution: self.workflow_info.lock().unwrap().workflow_execution.clone(),
            activity_id: activity_id.clone(),
            // the activity id doubles as the task token so heartbeats and
            // out-of-band completions can be routed back
            task_token: activity_id.as_bytes().to_vec(),
            activity_type: params.activity_type.clone(),
            input: params.input.clone(),
            schedule_to_close_timeout: params.schedule_to_close_timeout,
            start_to_close_timeout: params.start_to_close_timeout,
            heartbeat_timeout: params.heartbeat_timeout,
        };
        let handler = self.new_test_activity_task_handler(&params.task_list);

        self.shared.scheduler.lock().unwrap().activities.insert(
            activity_id.clone(),
            ActivityHandle {
                callback: Some(callback),
                activity_type: activity_type.clone(),
            },
        );
        self.shared.running_count.fetch_add(1, Ordering::SeqCst);

        // the activity runs outside the workflow dispatcher
        let weak = self.self_weak.clone();
        let spawn_id = activity_id.clone();
        self.shared.runtime.spawn(async move {
            let runtime: Option<Arc<dyn ActivityRuntime>> = Some(Arc::new(TestActivityRuntime {
                env: weak.clone(),
                activity_id: spawn_id.clone(),
                activity_type: activity_type.clone(),
            }));
            let result = handler.execute(task, runtime).await;
            if let Some(env) = weak.upgrade() {
                match result {
                    Ok(response) => {
                        let cb_env = env.clone();
                        let cb_id = spawn_id.clone();
                        let cb_type = activity_type.clone();
                        env.post_callback(
                            move || {
                                cb_env.handle_activity_result(&cb_id, response, &cb_type);
                            },
                            false,
                        );
                    }
                    Err(err) => env.post_panic(format!("activity task failed: {err}")),
                }
                env.shared.running_count.fetch_sub(1, Ordering::SeqCst);
            }
        });

        activity_id
    }

    fn request_cancel_activity(&self, activity_id: &str) {
        let removed = {
            let mut st = self.shared.scheduler.lock().unwrap();
            st.activities.remove(activity_id)
        };
        let Some(mut handle) = removed else {
            tracing::debug!(activity_id, "cancel failed, activity not found or already completed");
            return;
        };
        tracing::debug!(activity_id, "request cancel activity");
        let info = self.get_activity_info(activity_id, &handle.activity_type);
        let cb = handle.callback.take();
        let env = self.arc();
        self.post_callback(
            move || {
                if let Some(cb) = cb {
                    cb(None, Some(factory::canceled_error()));
                }
                env.notify_activity_canceled(&info);
            },
            true,
        );
    }

    fn execute_child_workflow(
        &self,
        params: ChildWorkflowParams,
        callback: ResultHandler,
        started_handler: StartedHandler,
    ) -> Result<(), TidalError> {
        tracing::debug!(workflow_type = %params.workflow_type.name, "execute child workflow");
        let child = self.new_child_env(&params, callback);

        // the child is "started" immediately, before its code first runs
        started_handler(child.workflow_info.lock().unwrap().workflow_execution.clone());
        self.shared.running_count.fetch_add(1, Ordering::SeqCst);

        let workflow_type = params.workflow_type.name;
        let input = params.input;
        self.shared
            .runtime
            .spawn(child.execute_workflow_background(workflow_type, input));
        Ok(())
    }

    fn request_cancel_workflow(
        &self,
        _domain: &str,
        workflow_id: &str,
        _run_id: &str,
    ) -> Result<(), TidalError> {
        let own_id = self
            .workflow_info
            .lock()
            .unwrap()
            .workflow_execution
            .workflow_id
            .clone();
        if own_id == workflow_id {
            if let Some(handler) = self.cancel_handler.lock().unwrap().as_ref() {
                handler();
            }
            if self.is_child() {
                let env = self.arc();
                self.post_callback(
                    move || {
                        let info = env.workflow_info.lock().unwrap().clone();
                        env.notify_child_workflow_canceled(&info);
                    },
                    false,
                );
            }
        } else {
            let removed = self
                .shared
                .scheduler
                .lock()
                .unwrap()
                .child_workflows
                .remove(workflow_id);
            if let Some(handle) = removed {
                handle.env.cancel_workflow_via_callback();
            }
        }
        Ok(())
    }

    fn side_effect(
        &self,
        func: Box<dyn FnOnce() -> Result<Vec<u8>, TidalError> + Send>,
        callback: ResultHandler,
    ) {
        // deterministic in tests: run on the calling thread, no queue hop
        match func() {
            Ok(bytes) => callback(Some(bytes), None),
            Err(err) => callback(None, Some(err)),
        }
    }

    fn get_version(&self, change_id: &str, min_supported: i32, max_supported: i32) -> i32 {
        let mut versions = self.change_versions.lock().unwrap();
        if let Some(&version) = versions.get(change_id) {
            if version < min_supported || version > max_supported {
                panic!(
                    "workflow code removed support of version {version} for change id {change_id} \
                     (supported range [{min_supported}, {max_supported}])"
                );
            }
            return version;
        }
        versions.insert(change_id.to_string(), max_supported);
        max_supported
    }

    fn register_cancel_handler(&self, handler: CancelHandler) {
        *self.cancel_handler.lock().unwrap() = Some(handler);
    }

    fn register_signal_handler(&self, handler: SignalHandler) {
        *self.signal_handler.lock().unwrap() = Some(handler);
    }

    fn register_query_handler(&self, handler: QueryHandler) {
        *self.query_handler.lock().unwrap() = Some(handler);
    }

    fn complete(&self, result: Option<Vec<u8>>, error: Option<TidalError>) {
        if self.completed.load(Ordering::SeqCst) {
            tracing::debug!("workflow already completed");
            return;
        }
        if matches!(error, Some(TidalError::Canceled(_))) {
            if let Some(handler) = self.cancel_handler.lock().unwrap().as_ref() {
                handler();
            }
        }

        self.completed.store(true, Ordering::SeqCst);
        {
            let mut outcome = self.outcome.lock().unwrap();
            outcome.result = result.clone();
            outcome.error = error.clone();
        }
        if let Some(done) = self.done_tx.lock().unwrap().take() {
            let _ = done.send(());
        }

        if self.is_child() {
            let child_workflow_id = self
                .workflow_info
                .lock()
                .unwrap()
                .workflow_execution
                .workflow_id
                .clone();
            let removed = self
                .shared
                .scheduler
                .lock()
                .unwrap()
                .child_workflows
                .remove(&child_workflow_id);
            // a child completing after cancellation has already left the
            // registry; its completion is dropped
            if let Some(mut handle) = removed {
                let cb = handle.callback.take();
                let Some(parent) = self.parent.as_ref().and_then(|p| p.upgrade()) else {
                    return;
                };
                let child = self.arc();
                parent.post_callback(
                    move || {
                        if let Some(cb) = cb {
                            cb(result.clone(), error.clone());
                        }
                        let info = child.workflow_info.lock().unwrap().clone();
                        let encoded = result.map(EncodedValue::new);
                        child.notify_child_workflow_completed(
                            &info,
                            encoded.as_ref(),
                            error.as_ref(),
                        );
                    },
                    true,
                );
            }
        }
    }
}

/// Heartbeat routing installed on every activity the harness launches.
struct TestActivityRuntime {
    env: Weak<EnvInner>,
    activity_id: String,
    activity_type: String,
}

impl ActivityRuntime for TestActivityRuntime {
    fn record_heartbeat(&self, details: Option<Vec<u8>>) -> Result<(), TidalError> {
        let Some(env) = self.env.upgrade() else {
            return Err(factory::entity_not_exists_error("test environment gone"));
        };
        let known = env
            .shared
            .scheduler
            .lock()
            .unwrap()
            .activities
            .contains_key(&self.activity_id);
        if !known {
            tracing::debug!(
                activity_id = %self.activity_id,
                "heartbeat for unknown activity, already completed or cancelled"
            );
            return Err(factory::entity_not_exists_error(format!(
                "activity {} not found",
                self.activity_id
            )));
        }
        let info = env.get_activity_info(&self.activity_id, &self.activity_type);
        let listener_env = env.clone();
        env.post_callback(
            move || {
                let details = EncodedValues::new(details.unwrap_or_default());
                listener_env.notify_activity_heartbeat(&info, &details);
            },
            false,
        );
        Ok(())
    }
}

/// Layers mock interception and listener notification over a registered
/// activity.
struct ActivityExecutorWrapper {
    env: Weak<EnvInner>,
    name: String,
    real: Arc<dyn Activity>,
    metadata: ReturnMetadata,
}

#[async_trait::async_trait]
impl Activity for ActivityExecutorWrapper {
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, ActivityError> {
        let Some(env) = self.env.upgrade() else {
            return Err(ActivityError::Canceled { details: None });
        };

        {
            let info = ctx.info().clone();
            let args = EncodedValues::new(input.clone().unwrap_or_default());
            let listener_env = env.clone();
            env.post_callback(
                move || listener_env.notify_activity_started(&info, &args),
                false,
            );
        }

        if let Some(resolved) = env
            .clone()
            .get_mock_return(MockKind::Activity, &self.name, &input)
            .await
        {
            return match resolved.returns {
                MockReturns::ActivityFn(entry) => entry.activity.execute(ctx, input).await,
                MockReturns::Values { result, error } => {
                    match EnvInner::mock_values_outcome(&self.name, &self.metadata, result, error) {
                        Ok((bytes, None)) => Ok(bytes),
                        Ok((_, Some(err))) => Err(mock_error_to_activity_error(err)),
                        Err(msg) => {
                            env.post_panic(msg.clone());
                            Err(ActivityError::Panic(msg))
                        }
                    }
                }
                MockReturns::WorkflowFn(_) => {
                    let msg = format!(
                        "mock of activity {} configured with a workflow function",
                        self.name
                    );
                    env.post_panic(msg.clone());
                    Err(ActivityError::Panic(msg))
                }
            };
        }

        self.real.execute(ctx, input).await
    }
}

fn mock_error_to_activity_error(err: TidalError) -> ActivityError {
    match err {
        TidalError::Canceled(e) => ActivityError::Canceled {
            details: Some(e.details),
        },
        TidalError::Custom(e) => ActivityError::Application {
            reason: e.reason,
            details: Some(e.details),
        },
        TidalError::Timeout(e) => ActivityError::Timeout(e.timeout_type),
        TidalError::Panic(e) => ActivityError::Panic(e.message),
        other => ActivityError::Application {
            reason: REASON_GENERIC.to_string(),
            details: Some(other.to_string().into_bytes()),
        },
    }
}

/// Layers mock interception, listener notification and the running-count
/// protocol over a registered workflow function.
struct WorkflowExecutorWrapper {
    env: Weak<EnvInner>,
    name: String,
    real: Arc<dyn WorkflowFunction>,
    metadata: ReturnMetadata,
}

impl WorkflowFunction for WorkflowExecutorWrapper {
    fn execute(
        &self,
        ctx: tidal_workflow::WorkflowContext,
        input: Option<Vec<u8>>,
    ) -> futures::future::BoxFuture<'static, Result<Option<Vec<u8>>, TidalError>> {
        let env = self.env.upgrade().expect("test environment dropped");
        let name = self.name.clone();
        let real = self.real.clone();
        let metadata = self.metadata.clone();

        Box::pin(async move {
            if env.is_child() {
                let info = env.workflow_info.lock().unwrap().clone();
                let args = EncodedValues::new(input.clone().unwrap_or_default());
                let listener_env = env.clone();
                env.post_callback(
                    move || listener_env.notify_child_workflow_started(&info, &args),
                    false,
                );
            } else {
                // keep the clock from advancing before the root workflow
                // reaches its first suspension point; children were counted
                // in execute_child_workflow
                env.shared.running_count.fetch_add(1, Ordering::SeqCst);
            }

            // expectation matching may block on virtual time, so it runs on a
            // background task while this workflow suspends on a channel
            let (tx, rx) = wf_channel::channel::<Option<MockResolved>>(1);
            {
                let task_env = env.clone();
                let task_name = name.clone();
                let task_input = input.clone();
                env.shared.runtime.spawn(async move {
                    let mock_ret = task_env
                        .clone()
                        .get_mock_return(MockKind::Workflow, &task_name, &task_input)
                        .await;
                    task_env.post_callback(
                        move || {
                            let _ = tx.try_send(mock_ret);
                        },
                        true,
                    );
                });
            }
            let mock_ret = rx.recv().await.flatten();
            env.shared.running_count.fetch_sub(1, Ordering::SeqCst);

            match mock_ret {
                Some(resolved) => match resolved.returns {
                    MockReturns::WorkflowFn(entry) => entry.function.execute(ctx, input).await,
                    MockReturns::Values { result, error } => {
                        let (bytes, err) =
                            EnvInner::mock_values_outcome(&name, &metadata, result, error)
                                .unwrap_or_else(|msg| panic!("{msg}"));
                        match err {
                            Some(err) => Err(err),
                            None => Ok(bytes),
                        }
                    }
                    MockReturns::ActivityFn(_) => panic!(
                        "mock of workflow {name} configured with an activity function"
                    ),
                },
                None => real.execute(ctx, input).await,
            }
        })
    }
}

/// A virtual-time test environment for one workflow execution.
///
/// Clones share the same underlying environment, so a clone can be captured
/// by listeners to call back into the harness (for example to complete a
/// pending activity).
#[derive(Clone)]
pub struct TestWorkflowEnvironment {
    inner: Arc<EnvInner>,
}

impl TestWorkflowEnvironment {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        let (callback_tx, callback_rx) = mpsc::sync_channel(CALLBACK_QUEUE_CAPACITY);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .expect("unable to build background runtime");

        let shared = Arc::new(SharedEnvState {
            callback_tx,
            callback_rx: Mutex::new(callback_rx),
            mock_clock: MockClock::new(),
            scheduler: Mutex::new(SchedulerState::default()),
            running_count: AtomicI32::new(0),
            mocks: MockRegistry::new(),
            listeners: Mutex::new(TestListeners::default()),
            test_timeout: Mutex::new(DEFAULT_TEST_TIMEOUT),
            worker_options: Mutex::new(WorkerOptions::default()),
            registry,
            runtime,
        });

        let info = WorkflowInfo {
            workflow_execution: WorkflowExecution::new(
                DEFAULT_TEST_WORKFLOW_ID,
                DEFAULT_TEST_RUN_ID,
            ),
            workflow_type: WorkflowType::new("workflow-type-not-specified"),
            domain: DEFAULT_TEST_DOMAIN.to_string(),
            task_list: DEFAULT_TEST_TASK_LIST.to_string(),
            execution_start_to_close_timeout: Duration::from_secs(1),
            task_start_to_close_timeout: Duration::from_secs(1),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<EnvInner>| EnvInner {
            self_weak: weak.clone(),
            shared,
            parent: None,
            workflow_info: Mutex::new(info),
            workflow_def: Mutex::new(None),
            change_versions: Mutex::new(HashMap::new()),
            cancel_handler: Mutex::new(None),
            signal_handler: Mutex::new(None),
            query_handler: Mutex::new(None),
            completed: AtomicBool::new(false),
            outcome: Mutex::new(TestOutcome::default()),
            done_tx: Mutex::new(None),
            done_rx: Mutex::new(None),
        });

        Self { inner }
    }

    /// Register a workflow function under a name.
    pub fn register_workflow(&self, name: impl Into<String>, entry: WorkflowEntry) {
        self.inner.shared.registry.register_workflow(name, entry);
    }

    /// Register a workflow under an alias while keeping the original name
    /// resolvable.
    pub fn register_workflow_with_alias(
        &self,
        name: impl Into<String>,
        alias: impl Into<String>,
        entry: WorkflowEntry,
    ) {
        self.inner
            .shared
            .registry
            .register_workflow_with_alias(name, alias, entry);
    }

    /// Register an activity function under a name.
    pub fn register_activity(&self, name: impl Into<String>, entry: tidal_worker::ActivityEntry) {
        self.inner.shared.registry.register_activity(name, entry);
    }

    /// Restrict activities to specific task lists: once restricted, an
    /// activity resolves only when dispatched on one of its lists.
    pub fn set_activity_task_list(&self, task_list: &str, activity_names: &[&str]) {
        let mut st = self.inner.shared.scheduler.lock().unwrap();
        for name in activity_names {
            st.task_list_activities
                .entry((*name).to_string())
                .or_default()
                .insert(task_list.to_string());
        }
    }

    /// Run a workflow to completion (or to the test timeout). Blocks the
    /// calling thread; inspect the outcome afterwards with
    /// [`workflow_result`](Self::workflow_result) and friends.
    pub fn execute_workflow<A: Serialize>(&self, workflow_type: &str, args: A) {
        let input = encode_args(&args)
            .unwrap_or_else(|e| panic!("unable to encode workflow arguments: {e}"));
        self.inner.execute_workflow_by_name(workflow_type, Some(input));
    }

    /// Execute a single activity outside any workflow and return its typed
    /// result.
    pub fn execute_activity<A, R>(&self, activity_type: &str, args: A) -> Result<R, TidalError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let input = encode_args(&args)
            .unwrap_or_else(|e| panic!("unable to encode activity arguments: {e}"));
        let task = ActivityTask {
            workflow_execution: self
                .inner
                .workflow_info
                .lock()
                .unwrap()
                .workflow_execution
                .clone(),
            activity_id: "0".to_string(),
            task_token: b"0".to_vec(),
            activity_type: tidal_core::ActivityType::new(activity_type),
            input: Some(input),
            schedule_to_close_timeout: Duration::from_secs(600),
            start_to_close_timeout: Duration::from_secs(600),
            heartbeat_timeout: Duration::from_secs(0),
        };
        let handler = self.inner.new_test_activity_task_handler(DEFAULT_TEST_TASK_LIST);
        let runtime: Option<Arc<dyn ActivityRuntime>> = Some(Arc::new(TestActivityRuntime {
            env: self.inner.self_weak.clone(),
            activity_id: "0".to_string(),
            activity_type: activity_type.to_string(),
        }));

        let response = self
            .inner
            .shared
            .runtime
            .block_on(handler.execute(task, runtime))
            .unwrap_or_else(|e| panic!("{e}"));

        match response {
            ActivityTaskResponse::Completed { result } => {
                tidal_core::decode_args(result.as_deref())
                    .map_err(|e| TidalError::Serialization(e.to_string()))
            }
            ActivityTaskResponse::Failed { reason, details } => {
                Err(construct_error(&reason, details.unwrap_or_default()))
            }
            ActivityTaskResponse::Canceled { details } => Err(TidalError::Canceled(
                CanceledError::new(details.unwrap_or_default()),
            )),
            ActivityTaskResponse::Pending => Err(TidalError::ResultPending),
        }
    }

    /// Complete an activity that returned the pending sentinel, by its task
    /// token.
    pub fn complete_activity<T: Serialize>(
        &self,
        task_token: &[u8],
        result: Option<T>,
        err: Option<TidalError>,
    ) -> Result<(), TidalError> {
        if task_token.is_empty() {
            return Err(TidalError::Generic(GenericError::new(
                "empty task token provided",
            )));
        }
        let data = match result {
            Some(value) => Some(
                tidal_core::encode_arg(&value)
                    .map_err(|e| TidalError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        let activity_id = String::from_utf8_lossy(task_token).into_owned();
        let env = self.inner.clone();
        // do not auto-start a decision task: the activity might still be
        // unknown to this environment
        self.inner.post_callback(
            move || {
                let activity_type = env
                    .shared
                    .scheduler
                    .lock()
                    .unwrap()
                    .activities
                    .get(&activity_id)
                    .map(|h| h.activity_type.clone());
                let Some(activity_type) = activity_type else {
                    tracing::debug!(
                        activity_id = %activity_id,
                        "complete_activity: unknown activity, already completed or cancelled"
                    );
                    return;
                };
                let response = ActivityTaskResponse::from_result(data, err.as_ref());
                env.handle_activity_result(&activity_id, response, &activity_type);
            },
            false,
        );
        Ok(())
    }

    /// Deliver a signal to the workflow.
    pub fn signal_workflow<A: Serialize>(&self, signal_name: &str, arg: A) {
        let data = encode_args(&arg)
            .unwrap_or_else(|e| panic!("unable to encode signal payload: {e}"));
        let env = self.inner.clone();
        let name = signal_name.to_string();
        self.inner.post_callback(
            move || {
                let mut handler = env.signal_handler.lock().unwrap();
                match handler.as_mut() {
                    Some(handler) => handler(&name, Some(data)),
                    None => panic!("workflow has no signal handler registered; signal '{name}' dropped"),
                }
            },
            true,
        );
    }

    /// Query the workflow synchronously. Queries do not mutate workflow
    /// state and also work after the workflow has completed.
    pub fn query_workflow<A, R>(&self, query_type: &str, args: A) -> Result<R, TidalError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if query_type == QUERY_TYPE_STACK_TRACE {
            let trace = self.inner.workflow_stack_trace();
            let encoded = tidal_core::encode_arg(&trace)
                .map_err(|e| TidalError::Serialization(e.to_string()))?;
            return tidal_core::decode_args(Some(&encoded))
                .map_err(|e| TidalError::Serialization(e.to_string()));
        }
        let data =
            encode_args(&args).map_err(|e| TidalError::Serialization(e.to_string()))?;
        let handler = self.inner.query_handler.lock().unwrap();
        let Some(handler) = handler.as_ref() else {
            return Err(TidalError::Generic(GenericError::new(
                "workflow has no query handler registered",
            )));
        };
        let blob = handler(query_type, Some(data))?;
        tidal_core::decode_args(blob.as_deref())
            .map_err(|e| TidalError::Serialization(e.to_string()))
    }

    /// Request cancellation of the workflow under test.
    pub fn cancel_workflow(&self) {
        self.inner.cancel_workflow_via_callback();
    }

    /// Run `f` on the main loop after `delay` of virtual time. The scheduler
    /// decides, per its auto-fire policy, whether the delay is skipped
    /// virtually or paced against the wall clock.
    pub fn register_delayed_callback(&self, f: impl FnOnce() + Send + 'static, delay: Duration) {
        self.inner.register_delayed_callback_impl(f, delay);
    }

    /// Current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.shared.mock_clock.now()
    }

    /// Reposition the virtual clock; call before executing the workflow.
    pub fn set_start_time(&self, start: DateTime<Utc>) {
        self.inner.shared.mock_clock.set_now(start);
    }

    /// Wall-clock budget before the harness declares the test deadlocked.
    pub fn set_test_timeout(&self, timeout: Duration) {
        *self.inner.shared.test_timeout.lock().unwrap() = timeout;
    }

    pub fn set_worker_options(&self, options: WorkerOptions) {
        *self.inner.shared.worker_options.lock().unwrap() = options;
    }

    pub fn workflow_info(&self) -> WorkflowInfo {
        self.inner.workflow_info.lock().unwrap().clone()
    }

    pub fn is_workflow_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// The workflow's typed result, or its error.
    pub fn workflow_result<R: DeserializeOwned>(&self) -> Result<R, TidalError> {
        let outcome = self.inner.outcome.lock().unwrap();
        if let Some(err) = &outcome.error {
            return Err(err.clone());
        }
        tidal_core::decode_args(outcome.result.as_deref())
            .map_err(|e| TidalError::Serialization(e.to_string()))
    }

    /// The workflow's raw encoded result bytes.
    pub fn workflow_result_bytes(&self) -> Option<Vec<u8>> {
        self.inner.outcome.lock().unwrap().result.clone()
    }

    pub fn workflow_error(&self) -> Option<TidalError> {
        self.inner.outcome.lock().unwrap().error.clone()
    }

    /// Declare an expectation for an activity invocation.
    pub fn on_activity(&self, name: &str) -> crate::mock::MockActivityBuilder {
        crate::mock::MockActivityBuilder::new(&self.inner.shared.mocks, name)
    }

    /// Declare an expectation for a workflow invocation.
    pub fn on_workflow(&self, name: &str) -> crate::mock::MockWorkflowBuilder {
        crate::mock::MockWorkflowBuilder::new(&self.inner.shared.mocks, name)
    }

    /// Panic if any expectation with an exact call count went unmet.
    pub fn assert_expectations(&self) {
        if let Err(msg) = self.inner.shared.mocks.assert_expectations() {
            panic!("{msg}");
        }
    }

    pub fn set_on_activity_started(
        &self,
        listener: impl FnMut(&ActivityInfo, &EncodedValues) + Send + 'static,
    ) {
        self.inner.shared.listeners.lock().unwrap().on_activity_started = Some(Box::new(listener));
    }

    pub fn set_on_activity_completed(
        &self,
        listener: impl FnMut(&ActivityInfo, Option<&EncodedValue>, Option<&TidalError>) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_completed = Some(Box::new(listener));
    }

    pub fn set_on_activity_canceled(
        &self,
        listener: impl FnMut(&ActivityInfo) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_canceled = Some(Box::new(listener));
    }

    pub fn set_on_activity_heartbeat(
        &self,
        listener: impl FnMut(&ActivityInfo, &EncodedValues) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_activity_heartbeat = Some(Box::new(listener));
    }

    pub fn set_on_child_workflow_started(
        &self,
        listener: impl FnMut(&WorkflowInfo, &EncodedValues) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_started = Some(Box::new(listener));
    }

    pub fn set_on_child_workflow_completed(
        &self,
        listener: impl FnMut(&WorkflowInfo, Option<&EncodedValue>, Option<&TidalError>) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_completed = Some(Box::new(listener));
    }

    pub fn set_on_child_workflow_canceled(
        &self,
        listener: impl FnMut(&WorkflowInfo) + Send + 'static,
    ) {
        self.inner
            .shared
            .listeners
            .lock()
            .unwrap()
            .on_child_workflow_canceled = Some(Box::new(listener));
    }

    pub fn set_on_timer_scheduled(
        &self,
        listener: impl FnMut(&str, Duration) + Send + 'static,
    ) {
        self.inner.shared.listeners.lock().unwrap().on_timer_scheduled = Some(Box::new(listener));
    }

    pub fn set_on_timer_fired(&self, listener: impl FnMut(&str) + Send + 'static) {
        self.inner.shared.listeners.lock().unwrap().on_timer_fired = Some(Box::new(listener));
    }

    pub fn set_on_timer_cancelled(&self, listener: impl FnMut(&str) + Send + 'static) {
        self.inner.shared.listeners.lock().unwrap().on_timer_cancelled = Some(Box::new(listener));
    }
}

impl Default for TestWorkflowEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
