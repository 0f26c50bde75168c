//! Activity context and execution contract.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tidal_core::{ActivityInfo, TidalError, TimeoutType};

/// Errors an activity implementation can return
#[derive(Debug, Clone, Error)]
pub enum ActivityError {
    /// User-defined failure with a reason visible to the workflow
    #[error("activity failed: reason={reason}")]
    Application {
        reason: String,
        details: Option<Vec<u8>>,
    },

    /// The activity was canceled
    #[error("activity canceled")]
    Canceled { details: Option<Vec<u8>> },

    /// The activity exceeded one of its timeouts
    #[error("activity timed out: {0}")]
    Timeout(TimeoutType),

    /// The activity will complete out of band via the task token
    #[error("activity result pending")]
    ResultPending,

    /// The activity panicked while running
    #[error("activity panicked: {0}")]
    Panic(String),
}

impl ActivityError {
    pub fn application(reason: impl Into<String>, details: Option<Vec<u8>>) -> Self {
        Self::Application {
            reason: reason.into(),
            details,
        }
    }
}

/// Runtime services injected by whatever is hosting the activity. The test
/// environment installs an implementation that routes heartbeats back to the
/// scheduler by task token.
pub trait ActivityRuntime: Send + Sync {
    /// Record a heartbeat for the running activity.
    fn record_heartbeat(&self, details: Option<Vec<u8>>) -> Result<(), TidalError>;
}

/// Context handed to every activity invocation
#[derive(Clone)]
pub struct ActivityContext {
    info: ActivityInfo,
    runtime: Option<Arc<dyn ActivityRuntime>>,
}

impl ActivityContext {
    pub fn new(info: ActivityInfo, runtime: Option<Arc<dyn ActivityRuntime>>) -> Self {
        Self { info, runtime }
    }

    /// Information about the running activity
    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    /// Opaque token identifying this activity instance. Pass it to
    /// `complete_activity` for out-of-band completion.
    pub fn task_token(&self) -> &[u8] {
        &self.info.task_token
    }

    /// Record a heartbeat.
    ///
    /// Returns an `EntityNotExistsError` when the activity is no longer
    /// tracked, i.e. it has already completed or been cancelled. Callers that
    /// only heartbeat opportunistically can ignore the error.
    pub fn record_heartbeat(&self, details: Option<Vec<u8>>) -> Result<(), TidalError> {
        match &self.runtime {
            Some(runtime) => runtime.record_heartbeat(details),
            None => {
                tracing::debug!(
                    activity_id = %self.info.activity_id,
                    "heartbeat recorded outside a runtime, ignored"
                );
                Ok(())
            }
        }
    }
}

/// An executable activity implementation, keyed by name in the registry.
#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, ActivityError>;
}
