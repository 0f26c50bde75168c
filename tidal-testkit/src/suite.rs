//! Test suite entry points.
//!
//! A [`TestSuite`] owns the registry of workflows and activities shared by
//! the environments it creates, so registration never leaks across suites.

use crate::env::TestWorkflowEnvironment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tidal_core::TidalError;
use tidal_worker::{ActivityEntry, Registry, WorkflowEntry};

/// Factory for test environments sharing one registry.
pub struct TestSuite {
    registry: Registry,
}

impl TestSuite {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    pub fn register_workflow(&self, name: impl Into<String>, entry: WorkflowEntry) {
        self.registry.register_workflow(name, entry);
    }

    pub fn register_activity(&self, name: impl Into<String>, entry: ActivityEntry) {
        self.registry.register_activity(name, entry);
    }

    /// Create an environment for testing a workflow.
    pub fn new_test_workflow_environment(&self) -> TestWorkflowEnvironment {
        TestWorkflowEnvironment::with_registry(self.registry.clone())
    }

    /// Create an environment for testing activities in isolation.
    pub fn new_test_activity_environment(&self) -> TestActivityEnvironment {
        TestActivityEnvironment {
            env: TestWorkflowEnvironment::with_registry(self.registry.clone()),
        }
    }
}

impl Default for TestSuite {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot activity execution without a workflow.
pub struct TestActivityEnvironment {
    env: TestWorkflowEnvironment,
}

impl TestActivityEnvironment {
    pub fn register_activity(&self, name: impl Into<String>, entry: ActivityEntry) {
        self.env.register_activity(name, entry);
    }

    /// Execute a registered activity and return its typed result.
    pub fn execute_activity<A, R>(&self, activity_type: &str, args: A) -> Result<R, TidalError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.env.execute_activity(activity_type, args)
    }
}
