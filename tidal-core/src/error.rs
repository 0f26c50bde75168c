//! Error types for Tidal workflows and activities.
//!
//! This module defines all error kinds that a workflow under test can
//! observe: cancellation, timeouts, user-defined failures, continue-as-new
//! requests, and the infrastructure errors the harness synthesizes.

use std::fmt;
use thiserror::Error;

/// Failure reason used when an activity panics. Failure responses carry a
/// reason string; these constants let the harness rebuild the structured
/// error on the other side of the response.
pub const REASON_PANIC: &str = "tidalInternal:Panic";
/// Failure reason for generic (unstructured) errors.
pub const REASON_GENERIC: &str = "tidalInternal:Generic";
/// Failure reason for timeouts.
pub const REASON_TIMEOUT: &str = "tidalInternal:Timeout";

/// Custom error type for workflow-defined errors
#[derive(Debug, Clone, Error)]
#[error("CustomError: reason={reason}, details={details:?}")]
pub struct CustomError {
    pub reason: String,
    pub details: Vec<u8>,
}

impl CustomError {
    pub fn new(reason: impl Into<String>, details: Vec<u8>) -> Self {
        Self {
            reason: reason.into(),
            details,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn details(&self) -> &[u8] {
        &self.details
    }
}

/// Error type for canceled operations
#[derive(Debug, Clone, Default, Error)]
#[error("CanceledError: details={details:?}")]
pub struct CanceledError {
    pub details: Vec<u8>,
}

impl CanceledError {
    pub fn new(details: Vec<u8>) -> Self {
        Self { details }
    }

    pub fn details(&self) -> &[u8] {
        &self.details
    }
}

/// Error type for timeouts
#[derive(Debug, Clone, Error)]
#[error("TimeoutError: timeout_type={timeout_type}, details={details:?}")]
pub struct TimeoutError {
    pub timeout_type: TimeoutType,
    pub details: Vec<u8>,
}

impl TimeoutError {
    pub fn new(timeout_type: TimeoutType, details: Vec<u8>) -> Self {
        Self {
            timeout_type,
            details,
        }
    }

    pub fn timeout_type(&self) -> TimeoutType {
        self.timeout_type
    }

    pub fn details(&self) -> &[u8] {
        &self.details
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

impl fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutType::StartToClose => write!(f, "START_TO_CLOSE"),
            TimeoutType::ScheduleToStart => write!(f, "SCHEDULE_TO_START"),
            TimeoutType::ScheduleToClose => write!(f, "SCHEDULE_TO_CLOSE"),
            TimeoutType::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}

/// Generic workflow error
#[derive(Debug, Clone, Error)]
#[error("GenericError: message={message}")]
pub struct GenericError {
    pub message: String,
}

impl GenericError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error type for panics observed while running workflow or activity code
#[derive(Debug, Clone, Error)]
#[error("PanicError: message={message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Continue-as-new error - signals that the workflow should continue with a
/// new execution. The harness carries it to the test author unchanged.
#[derive(Debug, Clone, Error)]
#[error("ContinueAsNewError: workflow_type={workflow_type}, task_list={task_list}")]
pub struct ContinueAsNewError {
    pub workflow_type: String,
    pub task_list: String,
    pub input: Vec<u8>,
    pub execution_start_to_close_timeout: std::time::Duration,
    pub task_start_to_close_timeout: std::time::Duration,
}

/// Error for operations addressing an entity the harness no longer tracks,
/// such as a heartbeat for a completed or cancelled activity.
#[derive(Debug, Clone, Error)]
#[error("EntityNotExistsError: {message}")]
pub struct EntityNotExistsError {
    pub message: String,
}

impl EntityNotExistsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Main error type observed by workflows under test
#[derive(Debug, Clone, Error)]
pub enum TidalError {
    #[error(transparent)]
    Custom(#[from] CustomError),

    #[error(transparent)]
    Canceled(#[from] CanceledError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Generic(#[from] GenericError),

    #[error(transparent)]
    Panic(#[from] PanicError),

    #[error(transparent)]
    ContinueAsNew(#[from] ContinueAsNewError),

    #[error(transparent)]
    EntityNotExists(#[from] EntityNotExistsError),

    #[error("activity result pending")]
    ResultPending,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type TidalResult<T> = Result<T, TidalError>;

/// Rebuild a structured error from an activity failure response. Failure
/// responses flatten errors into (reason, details); reasons minted by the
/// harness map back to their original kind, anything else is a custom error.
pub fn construct_error(reason: &str, details: Vec<u8>) -> TidalError {
    match reason {
        REASON_PANIC => {
            let message = String::from_utf8_lossy(&details).into_owned();
            PanicError::new(message).into()
        }
        REASON_GENERIC => {
            let message = String::from_utf8_lossy(&details).into_owned();
            GenericError::new(message).into()
        }
        REASON_TIMEOUT => TimeoutError::new(TimeoutType::StartToClose, details).into(),
        _ => CustomError::new(reason, details).into(),
    }
}

/// Helper functions for creating errors
pub mod factory {
    use super::*;

    pub fn custom_error(reason: impl Into<String>, details: Vec<u8>) -> TidalError {
        CustomError::new(reason, details).into()
    }

    pub fn canceled_error() -> TidalError {
        CanceledError::default().into()
    }

    pub fn canceled_error_with_details(details: Vec<u8>) -> TidalError {
        CanceledError::new(details).into()
    }

    pub fn timeout_error(timeout_type: TimeoutType, details: Vec<u8>) -> TidalError {
        TimeoutError::new(timeout_type, details).into()
    }

    pub fn generic_error(message: impl Into<String>) -> TidalError {
        GenericError::new(message).into()
    }

    pub fn panic_error(message: impl Into<String>) -> TidalError {
        PanicError::new(message).into()
    }

    pub fn entity_not_exists_error(message: impl Into<String>) -> TidalError {
        EntityNotExistsError::new(message).into()
    }
}

/// Helper functions to check error types
pub fn is_custom_error(err: &TidalError) -> bool {
    matches!(err, TidalError::Custom(_))
}

pub fn is_canceled_error(err: &TidalError) -> bool {
    matches!(err, TidalError::Canceled(_))
}

pub fn is_timeout_error(err: &TidalError) -> bool {
    matches!(err, TidalError::Timeout(_))
}

pub fn is_generic_error(err: &TidalError) -> bool {
    matches!(err, TidalError::Generic(_))
}

pub fn is_panic_error(err: &TidalError) -> bool {
    matches!(err, TidalError::Panic(_))
}

pub fn is_continue_as_new_error(err: &TidalError) -> bool {
    matches!(err, TidalError::ContinueAsNew(_))
}

pub fn is_entity_not_exists_error(err: &TidalError) -> bool {
    matches!(err, TidalError::EntityNotExists(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_error_round_trips_custom_reason() {
        let err = construct_error("payment-declined", b"card expired".to_vec());
        assert!(is_custom_error(&err));
        match err {
            TidalError::Custom(c) => {
                assert_eq!(c.reason(), "payment-declined");
                assert_eq!(c.details(), b"card expired");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn construct_error_maps_internal_reasons() {
        assert!(is_panic_error(&construct_error(REASON_PANIC, vec![])));
        assert!(is_generic_error(&construct_error(REASON_GENERIC, vec![])));
        assert!(is_timeout_error(&construct_error(REASON_TIMEOUT, vec![])));
    }

    #[test]
    fn canceled_error_is_detectable_through_the_aggregate() {
        let err: TidalError = CanceledError::default().into();
        assert!(is_canceled_error(&err));
        assert!(!is_timeout_error(&err));
    }
}
