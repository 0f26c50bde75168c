//! Shared types for workflow execution, activity dispatch and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workflow execution identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Workflow type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Activity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityType {
    pub name: String,
}

impl ActivityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Workflow information available in the workflow context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub domain: String,
    pub task_list: String,
    pub execution_start_to_close_timeout: Duration,
    pub task_start_to_close_timeout: Duration,
}

/// Activity information carried alongside an activity invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_token: Vec<u8>,
    pub workflow_execution: WorkflowExecution,
}

/// Parameters for scheduling an activity from workflow code
#[derive(Debug, Clone)]
pub struct ExecuteActivityParams {
    /// Explicit activity id; minted from the environment counter when absent
    pub activity_id: Option<String>,
    pub activity_type: ActivityType,
    pub input: Option<Vec<u8>>,
    pub task_list: String,
    pub schedule_to_close_timeout: Duration,
    pub start_to_close_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

impl ExecuteActivityParams {
    pub fn new(activity_type: impl Into<String>, input: Option<Vec<u8>>) -> Self {
        Self {
            activity_id: None,
            activity_type: ActivityType::new(activity_type),
            input,
            task_list: String::new(),
            schedule_to_close_timeout: Duration::from_secs(0),
            start_to_close_timeout: Duration::from_secs(0),
            heartbeat_timeout: Duration::from_secs(0),
        }
    }
}

/// Parameters for starting a child workflow
#[derive(Debug, Clone)]
pub struct ChildWorkflowParams {
    /// Child workflow id; defaulted from the parent run id and the
    /// environment counter when empty
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub input: Option<Vec<u8>>,
    pub domain: String,
    pub task_list: String,
    pub execution_start_to_close_timeout: Duration,
    pub task_start_to_close_timeout: Duration,
}

impl ChildWorkflowParams {
    pub fn new(workflow_type: impl Into<String>, input: Option<Vec<u8>>) -> Self {
        Self {
            workflow_id: String::new(),
            workflow_type: WorkflowType::new(workflow_type),
            input,
            domain: String::new(),
            task_list: String::new(),
            execution_start_to_close_timeout: Duration::from_secs(0),
            task_start_to_close_timeout: Duration::from_secs(0),
        }
    }
}

/// Worker configuration for the test environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Identity recorded on activity tasks
    pub identity: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            identity: format!("tidal-test-worker-{}", uuid::Uuid::new_v4()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_activity_params_default_shape() {
        let params = ExecuteActivityParams::new("charge_card", None);
        assert!(params.activity_id.is_none());
        assert_eq!(params.activity_type.name, "charge_card");
        assert!(params.task_list.is_empty());
    }

    #[test]
    fn worker_identities_are_unique() {
        assert_ne!(
            WorkerOptions::default().identity,
            WorkerOptions::default().identity
        );
    }
}
