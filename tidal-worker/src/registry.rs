//! Registry of workflows and activities by name.
//!
//! The registry is a handle, not a process-wide singleton: every test suite
//! creates its own, so registrations never leak between tests. Typed
//! registration helpers erase user function signatures down to the byte-level
//! contracts the harness executes, and capture the return-shape metadata the
//! mock overlay validates synthesized values against.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tidal_activity::{Activity, ActivityContext, ActivityError};
use tidal_core::{decode_args, encode_arg, TidalError};
use tidal_workflow::{WorkflowContext, WorkflowFunction};

/// Return-shape metadata captured at registration time, used to validate
/// mock return specifications against the real function signature.
#[derive(Clone)]
pub struct ReturnMetadata {
    /// Whether the function returns a value besides the error slot
    pub returns_value: bool,
    /// Checks that a synthesized JSON value is assignable to the declared
    /// return type (null is assignable only to null-accepting types)
    pub validate_result: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>,
}

fn return_metadata<R: DeserializeOwned + 'static>() -> ReturnMetadata {
    ReturnMetadata {
        returns_value: TypeId::of::<R>() != TypeId::of::<()>(),
        validate_result: Arc::new(|value| {
            serde_json::from_value::<R>(value.clone())
                .map(|_| ())
                .map_err(|e| e.to_string())
        }),
    }
}

fn encode_return<R: Serialize + 'static>(value: &R) -> Option<Vec<u8>> {
    if TypeId::of::<R>() == TypeId::of::<()>() {
        return None;
    }
    match encode_arg(value) {
        Ok(bytes) => Some(bytes),
        Err(e) => panic!("unable to encode return value: {e}"),
    }
}

/// A registered workflow
#[derive(Clone)]
pub struct WorkflowEntry {
    pub function: Arc<dyn WorkflowFunction>,
    pub metadata: ReturnMetadata,
}

/// A registered activity
#[derive(Clone)]
pub struct ActivityEntry {
    pub activity: Arc<dyn Activity>,
    pub metadata: ReturnMetadata,
}

type WorkflowBody<A, R> =
    Arc<dyn Fn(WorkflowContext, A) -> BoxFuture<'static, Result<R, TidalError>> + Send + Sync>;

struct TypedWorkflow<A, R> {
    body: WorkflowBody<A, R>,
}

impl<A, R> WorkflowFunction for TypedWorkflow<A, R>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn execute(
        &self,
        ctx: WorkflowContext,
        input: Option<Vec<u8>>,
    ) -> BoxFuture<'static, Result<Option<Vec<u8>>, TidalError>> {
        let body = self.body.clone();
        Box::pin(async move {
            let args: A = decode_args(input.as_deref())
                .unwrap_or_else(|e| panic!("unable to decode workflow arguments: {e}"));
            let result = body(ctx, args).await?;
            Ok(encode_return(&result))
        })
    }
}

/// Build a registrable workflow entry from a typed workflow function.
pub fn workflow_fn<A, R, F, Fut>(f: F) -> WorkflowEntry
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(WorkflowContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TidalError>> + Send + 'static,
{
    let f = Arc::new(f);
    let body: WorkflowBody<A, R> = Arc::new(move |ctx, args| Box::pin(f(ctx, args)));
    WorkflowEntry {
        function: Arc::new(TypedWorkflow { body }),
        metadata: return_metadata::<R>(),
    }
}

type ActivityBody<A, R> =
    Arc<dyn Fn(ActivityContext, A) -> BoxFuture<'static, Result<R, ActivityError>> + Send + Sync>;

struct TypedActivity<A, R> {
    body: ActivityBody<A, R>,
}

#[async_trait::async_trait]
impl<A, R> Activity for TypedActivity<A, R>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, ActivityError> {
        let args: A = decode_args(input.as_deref())
            .unwrap_or_else(|e| panic!("unable to decode activity arguments: {e}"));
        let result = (self.body)(ctx, args).await?;
        Ok(encode_return(&result))
    }
}

/// Build a registrable activity entry from a typed activity function.
pub fn activity_fn<A, R, F, Fut>(f: F) -> ActivityEntry
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(ActivityContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ActivityError>> + Send + 'static,
{
    let f = Arc::new(f);
    let body: ActivityBody<A, R> = Arc::new(move |ctx, args| Box::pin(f(ctx, args)));
    ActivityEntry {
        activity: Arc::new(TypedActivity { body }),
        metadata: return_metadata::<R>(),
    }
}

struct RegistryInner {
    workflows: Mutex<HashMap<String, WorkflowEntry>>,
    workflow_aliases: Mutex<HashMap<String, String>>,
    activities: Mutex<HashMap<String, ActivityEntry>>,
}

/// Shared registry handle
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                workflows: Mutex::new(HashMap::new()),
                workflow_aliases: Mutex::new(HashMap::new()),
                activities: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn register_workflow(&self, name: impl Into<String>, entry: WorkflowEntry) {
        self.inner.workflows.lock().unwrap().insert(name.into(), entry);
    }

    /// Register a workflow under `alias` while keeping `name` resolvable to
    /// it, so callers can execute by either.
    pub fn register_workflow_with_alias(
        &self,
        name: impl Into<String>,
        alias: impl Into<String>,
        entry: WorkflowEntry,
    ) {
        let alias = alias.into();
        self.inner
            .workflow_aliases
            .lock()
            .unwrap()
            .insert(name.into(), alias.clone());
        self.register_workflow(alias, entry);
    }

    pub fn register_activity(&self, name: impl Into<String>, entry: ActivityEntry) {
        self.inner.activities.lock().unwrap().insert(name.into(), entry);
    }

    pub fn get_workflow_fn(&self, name: &str) -> Option<WorkflowEntry> {
        self.inner.workflows.lock().unwrap().get(name).cloned()
    }

    pub fn get_activity(&self, name: &str) -> Option<ActivityEntry> {
        self.inner.activities.lock().unwrap().get(name).cloned()
    }

    pub fn workflow_alias(&self, name: &str) -> Option<String> {
        self.inner.workflow_aliases.lock().unwrap().get(name).cloned()
    }

    pub fn registered_workflow_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.workflows.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn registered_activities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.activities.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn return_metadata_distinguishes_unit_returns() {
        let unit = return_metadata::<()>();
        assert!(!unit.returns_value);

        let valued = return_metadata::<i64>();
        assert!(valued.returns_value);
    }

    #[test]
    fn validation_rejects_mismatched_types() {
        let meta = return_metadata::<i64>();
        assert!((meta.validate_result)(&json!(7)).is_ok());
        assert!((meta.validate_result)(&json!("seven")).is_err());
        assert!((meta.validate_result)(&Value::Null).is_err());
    }

    #[test]
    fn validation_accepts_null_for_nullable_types() {
        let meta = return_metadata::<Option<Vec<String>>>();
        assert!((meta.validate_result)(&Value::Null).is_ok());
    }

    #[test]
    fn aliases_resolve_to_registered_entries() {
        let registry = Registry::new();
        registry.register_workflow_with_alias(
            "crate::flows::checkout",
            "checkout",
            workflow_fn(|_ctx, (): ()| async move { Ok::<_, TidalError>("ok".to_string()) }),
        );

        assert_eq!(
            registry.workflow_alias("crate::flows::checkout").as_deref(),
            Some("checkout")
        );
        assert!(registry.get_workflow_fn("checkout").is_some());
        assert!(registry.get_workflow_fn("crate::flows::checkout").is_none());
    }

    #[test]
    fn registered_names_are_sorted() {
        let registry = Registry::new();
        registry.register_activity(
            "b",
            activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(()) }),
        );
        registry.register_activity(
            "a",
            activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(()) }),
        );
        assert_eq!(registry.registered_activities(), vec!["a", "b"]);
    }
}
