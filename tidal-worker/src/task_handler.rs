//! Activity task handler for executing activity tasks in-process.

use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tidal_activity::{Activity, ActivityContext, ActivityError, ActivityRuntime};
use tidal_core::{
    ActivityInfo, ActivityType, GenericError, TidalError, WorkflowExecution, REASON_GENERIC,
    REASON_PANIC, REASON_TIMEOUT,
};

/// An activity task: everything the handler needs to run one invocation.
/// The task token is the activity id verbatim, so heartbeats and out-of-band
/// completions can be routed back to the right instance.
#[derive(Debug, Clone)]
pub struct ActivityTask {
    pub workflow_execution: WorkflowExecution,
    pub activity_id: String,
    pub task_token: Vec<u8>,
    pub activity_type: ActivityType,
    pub input: Option<Vec<u8>>,
    pub schedule_to_close_timeout: Duration,
    pub start_to_close_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

/// Outcome of one activity task execution.
#[derive(Debug, Clone)]
pub enum ActivityTaskResponse {
    Completed { result: Option<Vec<u8>> },
    Failed { reason: String, details: Option<Vec<u8>> },
    Canceled { details: Option<Vec<u8>> },
    /// The activity will complete out of band via its task token
    Pending,
}

impl ActivityTaskResponse {
    /// Build the response a directly supplied `(result, error)` pair maps to,
    /// used for out-of-band activity completion.
    pub fn from_result(result: Option<Vec<u8>>, err: Option<&TidalError>) -> Self {
        match err {
            None => ActivityTaskResponse::Completed { result },
            Some(TidalError::Canceled(e)) => ActivityTaskResponse::Canceled {
                details: Some(e.details.clone()),
            },
            Some(TidalError::Custom(e)) => ActivityTaskResponse::Failed {
                reason: e.reason.clone(),
                details: Some(e.details.clone()),
            },
            Some(TidalError::Timeout(e)) => ActivityTaskResponse::Failed {
                reason: REASON_TIMEOUT.to_string(),
                details: Some(e.details.clone()),
            },
            Some(TidalError::Panic(e)) => ActivityTaskResponse::Failed {
                reason: REASON_PANIC.to_string(),
                details: Some(e.message.clone().into_bytes()),
            },
            Some(other) => ActivityTaskResponse::Failed {
                reason: REASON_GENERIC.to_string(),
                details: Some(other.to_string().into_bytes()),
            },
        }
    }
}

/// Resolves an activity name to an executable implementation. The test
/// environment supplies a resolver that layers mock interception and
/// task-list restrictions over the registry.
pub type ActivityProvider = Box<dyn Fn(&str) -> Option<Arc<dyn Activity>> + Send + Sync>;

/// Executes activity tasks against a name→activity resolver.
pub struct ActivityTaskHandler {
    registry: Registry,
    identity: String,
    provider: ActivityProvider,
}

impl ActivityTaskHandler {
    pub fn with_provider(registry: Registry, identity: String, provider: ActivityProvider) -> Self {
        Self {
            registry,
            identity,
            provider,
        }
    }

    /// Execute one activity task to a response.
    ///
    /// User code runs on a spawned task so panics are captured and translated
    /// into a failure response rather than tearing down the caller.
    pub async fn execute(
        &self,
        task: ActivityTask,
        runtime: Option<Arc<dyn ActivityRuntime>>,
    ) -> Result<ActivityTaskResponse, TidalError> {
        let activity_type = task.activity_type.name.clone();
        tracing::debug!(
            activity_id = %task.activity_id,
            activity_type = %activity_type,
            identity = %self.identity,
            "executing activity task"
        );

        let activity = match (self.provider)(&activity_type) {
            Some(activity) => activity,
            None => {
                let supported = self.registry.registered_activities().join(", ");
                tracing::warn!(activity_type = %activity_type, "activity not registered");
                return Err(TidalError::Generic(GenericError::new(format!(
                    "unable to find activity type: {activity_type}. Supported types: [{supported}]"
                ))));
            }
        };

        let info = ActivityInfo {
            activity_id: task.activity_id.clone(),
            activity_type: task.activity_type.clone(),
            task_token: task.task_token.clone(),
            workflow_execution: task.workflow_execution.clone(),
        };
        let ctx = ActivityContext::new(info, runtime);

        let input = task.input.clone();
        let execution = tokio::spawn(async move { activity.execute(ctx, input).await }).await;

        let response = match execution {
            Ok(Ok(result)) => ActivityTaskResponse::Completed { result },
            Ok(Err(ActivityError::ResultPending)) => ActivityTaskResponse::Pending,
            Ok(Err(ActivityError::Canceled { details })) => {
                ActivityTaskResponse::Canceled { details }
            }
            Ok(Err(ActivityError::Application { reason, details })) => {
                tracing::debug!(activity_type = %activity_type, reason = %reason, "activity failed");
                ActivityTaskResponse::Failed { reason, details }
            }
            Ok(Err(ActivityError::Timeout(timeout_type))) => ActivityTaskResponse::Failed {
                reason: REASON_TIMEOUT.to_string(),
                details: Some(timeout_type.to_string().into_bytes()),
            },
            Ok(Err(ActivityError::Panic(message))) => ActivityTaskResponse::Failed {
                reason: REASON_PANIC.to_string(),
                details: Some(message.into_bytes()),
            },
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("activity panicked: {join_error}")
                } else {
                    format!("activity task aborted: {join_error}")
                };
                tracing::error!(activity_type = %activity_type, "{message}");
                ActivityTaskResponse::Failed {
                    reason: REASON_PANIC.to_string(),
                    details: Some(message.into_bytes()),
                }
            }
        };

        Ok(response)
    }
}
