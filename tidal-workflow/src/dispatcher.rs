//! Deterministic task scheduler for workflow execution.
//!
//! The dispatcher manages the execution of workflow tasks by polling them in
//! creation order until all tasks are blocked. Workflow futures never see a
//! real reactor; they are re-polled after every external event the host
//! delivers, which keeps execution reproducible.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to be polled
    Ready,
    /// Task is blocked waiting for something
    Blocked,
    /// Task has completed
    Completed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Ready => write!(f, "ready"),
            TaskState::Blocked => write!(f, "blocked"),
            TaskState::Completed => write!(f, "completed"),
        }
    }
}

/// A workflow task that can be executed by the dispatcher. Tasks perform
/// their own completion side effects, so the future output is `()`.
pub struct WorkflowTask {
    pub id: u64,
    /// Task name, used in the logical stack dump
    pub name: String,
    future: Pin<Box<dyn Future<Output = ()> + Send>>,
    state: TaskState,
}

impl WorkflowTask {
    pub fn new<F>(id: u64, name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            id,
            name: name.into(),
            future: Box::pin(future),
            state: TaskState::Ready,
        }
    }

    fn poll(&mut self, waker: &Waker) -> Poll<()> {
        let mut cx = Context::from_waker(waker);
        self.future.as_mut().poll(&mut cx)
    }
}

/// Dispatcher error type
#[derive(Debug, Clone)]
pub enum DispatcherError {
    /// `execute_until_all_blocked` called while already executing
    AlreadyExecuting,
}

impl std::fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherError::AlreadyExecuting => write!(f, "dispatcher is already executing"),
        }
    }
}

impl std::error::Error for DispatcherError {}

/// Deterministic workflow task dispatcher.
///
/// Tasks are polled in creation order; a round that changes no task state
/// means every task is blocked on an external event, and control returns to
/// the host.
pub struct WorkflowDispatcher {
    tasks: Vec<WorkflowTask>,
    sequence: Arc<AtomicU64>,
    executing: bool,
    /// Tasks spawned while a dispatch round is running; picked up at the top
    /// of the next round
    pending_tasks: Arc<Mutex<Vec<WorkflowTask>>>,
}

impl WorkflowDispatcher {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            executing: false,
            pending_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn next_task_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Shared handles that let workflow code spawn tasks mid-dispatch.
    pub fn spawn_handles(&self) -> (Arc<Mutex<Vec<WorkflowTask>>>, Arc<AtomicU64>) {
        (self.pending_tasks.clone(), self.sequence.clone())
    }

    /// Spawn a new task, queueing it if a dispatch round is in progress.
    pub fn spawn_task(&mut self, task: WorkflowTask) -> u64 {
        let id = task.id;
        if self.executing {
            self.pending_tasks.lock().unwrap().push(task);
        } else {
            self.tasks.push(task);
        }
        id
    }

    /// Execute tasks until all are blocked.
    ///
    /// Returns `Ok(true)` if every task completed, `Ok(false)` if some are
    /// still blocked on external events.
    pub fn execute_until_all_blocked(&mut self) -> Result<bool, DispatcherError> {
        if self.executing {
            return Err(DispatcherError::AlreadyExecuting);
        }
        self.executing = true;

        // manual polling; wake-ups come from re-polling after host callbacks
        let waker = create_noop_waker();

        loop {
            {
                let mut pending = self.pending_tasks.lock().unwrap();
                if !pending.is_empty() {
                    tracing::debug!(count = pending.len(), "adding spawned workflow tasks");
                    self.tasks.append(&mut pending);
                }
            }

            let mut any_changed = false;

            for task in &mut self.tasks {
                if task.state == TaskState::Completed {
                    continue;
                }
                match task.poll(&waker) {
                    Poll::Ready(()) => {
                        tracing::debug!(task_id = task.id, name = %task.name, "workflow task completed");
                        task.state = TaskState::Completed;
                        any_changed = true;
                    }
                    Poll::Pending => {
                        if task.state != TaskState::Blocked {
                            task.state = TaskState::Blocked;
                            any_changed = true;
                        }
                    }
                }
            }

            // tasks spawned by the last round still count as a state change
            if !any_changed && self.pending_tasks.lock().unwrap().is_empty() {
                break;
            }
        }

        self.executing = false;
        Ok(self.tasks.iter().all(|t| t.state == TaskState::Completed))
    }

    /// Render the logical stack of the workflow: every task with its state.
    /// Used for the deadlock diagnostic.
    pub fn stack_trace(&self) -> String {
        if self.tasks.is_empty() {
            return "no workflow tasks started".to_string();
        }
        let mut out = String::new();
        for task in &self.tasks {
            out.push_str(&format!("task {} [{}]: {}\n", task.id, task.name, task.state));
        }
        out
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn blocked_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Blocked)
            .count()
    }

    pub fn completed_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .count()
    }
}

impl Default for WorkflowDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a no-op waker for manual polling. The dispatcher re-polls blocked
/// tasks after every host callback, so wake notifications are unnecessary.
fn create_noop_waker() -> Waker {
    unsafe fn noop_clone(_data: *const ()) -> RawWaker {
        noop_raw_waker()
    }

    unsafe fn noop(_data: *const ()) {}

    fn noop_raw_waker() -> RawWaker {
        RawWaker::new(
            std::ptr::null(),
            &RawWakerVTable::new(noop_clone, noop, noop, noop),
        )
    }

    unsafe { Waker::from_raw(noop_raw_waker()) }
}
