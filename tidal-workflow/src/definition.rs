//! Workflow definition plumbing.
//!
//! A [`WorkflowDefinition`] is the contract the host drives: start it once,
//! nudge it with decision tasks, and ask for its logical stack when
//! diagnosing a deadlock. [`FunctionWorkflowDefinition`] binds a registered
//! workflow function to a deterministic dispatcher and wires the workflow's
//! signal, query and cancel handling into the environment.

use crate::context::WorkflowContext;
use crate::dispatcher::{WorkflowDispatcher, WorkflowTask};
use crate::env::WorkflowEnvironment;
use futures::future::BoxFuture;
use std::sync::Arc;
use tidal_core::TidalError;

/// A running workflow as seen by its host.
pub trait WorkflowDefinition: Send {
    /// Start the workflow. Called exactly once, on the host's main loop.
    fn execute(&mut self, input: Option<Vec<u8>>);

    /// Resume the workflow dispatcher and run until all tasks are blocked,
    /// the equivalent of the server delivering a new decision task.
    fn on_decision_task_started(&mut self);

    /// The workflow's logical stack, for deadlock diagnostics.
    fn stack_trace(&self) -> String;
}

/// A type-erased, executable workflow implementation, keyed by name in the
/// registry.
pub trait WorkflowFunction: Send + Sync {
    fn execute(
        &self,
        ctx: WorkflowContext,
        input: Option<Vec<u8>>,
    ) -> BoxFuture<'static, Result<Option<Vec<u8>>, TidalError>>;
}

/// Drives a workflow function with a deterministic dispatcher.
pub struct FunctionWorkflowDefinition {
    env: Arc<dyn WorkflowEnvironment>,
    workflow_type: String,
    body: Arc<dyn WorkflowFunction>,
    dispatcher: WorkflowDispatcher,
    context: WorkflowContext,
}

impl FunctionWorkflowDefinition {
    pub fn new(
        env: Arc<dyn WorkflowEnvironment>,
        workflow_type: impl Into<String>,
        body: Arc<dyn WorkflowFunction>,
    ) -> Self {
        let dispatcher = WorkflowDispatcher::new();
        let (pending_tasks, task_sequence) = dispatcher.spawn_handles();
        let context = WorkflowContext::new(env.clone(), pending_tasks, task_sequence);
        Self {
            env,
            workflow_type: workflow_type.into(),
            body,
            dispatcher,
            context,
        }
    }

    fn run_dispatcher(&mut self) {
        if let Err(e) = self.dispatcher.execute_until_all_blocked() {
            panic!("workflow dispatcher error: {e}");
        }
    }
}

impl WorkflowDefinition for FunctionWorkflowDefinition {
    fn execute(&mut self, input: Option<Vec<u8>>) {
        // route signals, queries and cancellation into the context state
        let state = self.context.state();
        self.env
            .register_signal_handler(Box::new(move |name, input| {
                state.push_signal(name, input);
            }));
        let state = self.context.state();
        self.env
            .register_query_handler(Box::new(move |query_type, args| {
                state.dispatch_query(query_type, args)
            }));
        let state = self.context.state();
        self.env.register_cancel_handler(Box::new(move || {
            state.set_cancelled();
        }));

        let env = self.env.clone();
        let ctx = self.context.clone();
        let body = self.body.clone();
        let id = self.dispatcher.next_task_id();
        let task = WorkflowTask::new(id, self.workflow_type.clone(), async move {
            match body.execute(ctx, input).await {
                Ok(result) => env.complete(result, None),
                Err(err) => env.complete(None, Some(err)),
            }
        });
        self.dispatcher.spawn_task(task);
        self.run_dispatcher();
    }

    fn on_decision_task_started(&mut self) {
        self.run_dispatcher();
    }

    fn stack_trace(&self) -> String {
        self.dispatcher.stack_trace()
    }
}
