//! Mock-and-expectations overlay.
//!
//! Expectations are declared per function name before the test runs. When a
//! mocked activity or workflow is invoked, the overlay matches the call
//! against its expectations on (name, positional argument values), optionally
//! suspends the caller on virtual time, runs a side-effect hook, and
//! synthesizes the configured return. Return specifications are validated
//! against the real function's return shape; mismatches abort the test.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidal_core::{EncodedValues, TidalError};
use tidal_worker::{ActivityEntry, WorkflowEntry};

/// Which invocation path an expectation intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MockKind {
    Activity,
    Workflow,
}

impl std::fmt::Display for MockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockKind::Activity => write!(f, "activity"),
            MockKind::Workflow => write!(f, "workflow"),
        }
    }
}

#[derive(Debug, Clone)]
enum ArgsMatcher {
    Any,
    Values(Vec<Value>),
}

impl ArgsMatcher {
    fn matches(&self, args: &[Value]) -> bool {
        match self {
            ArgsMatcher::Any => true,
            ArgsMatcher::Values(expected) => expected == args,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MockTimes {
    Any,
    Exact(usize),
}

/// Side-effect hook run just before the mock's return is delivered.
pub(crate) type MockRunFn = Arc<dyn Fn(&EncodedValues) + Send + Sync>;

/// The configured return of an expectation: either literal values or a
/// function with the same signature used as the implementation.
#[derive(Clone)]
pub(crate) enum MockReturns {
    Values {
        result: Option<Value>,
        error: Option<TidalError>,
    },
    ActivityFn(ActivityEntry),
    WorkflowFn(WorkflowEntry),
}

struct MockCallState {
    kind: MockKind,
    name: String,
    matcher: ArgsMatcher,
    wait: Duration,
    run_fn: Option<MockRunFn>,
    returns: Option<MockReturns>,
    times: MockTimes,
    calls: usize,
}

/// A matched expectation, snapshotted for execution.
pub(crate) struct MockResolved {
    pub wait: Duration,
    pub run_fn: Option<MockRunFn>,
    pub returns: MockReturns,
}

impl std::fmt::Debug for MockResolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockResolved")
            .field("wait", &self.wait)
            .field("run_fn", &self.run_fn.as_ref().map(|_| "<fn>"))
            .field("returns", &"<returns>")
            .finish()
    }
}

/// All expectations declared for one test environment.
pub(crate) struct MockRegistry {
    calls: Mutex<Vec<Arc<Mutex<MockCallState>>>>,
    expected: Mutex<HashSet<(MockKind, String)>>,
}

impl MockRegistry {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            expected: Mutex::new(HashSet::new()),
        }
    }

    fn register(&self, kind: MockKind, name: &str) -> Arc<Mutex<MockCallState>> {
        let state = Arc::new(Mutex::new(MockCallState {
            kind,
            name: name.to_string(),
            matcher: ArgsMatcher::Any,
            wait: Duration::ZERO,
            run_fn: None,
            returns: None,
            times: MockTimes::Any,
            calls: 0,
        }));
        self.expected
            .lock()
            .unwrap()
            .insert((kind, name.to_string()));
        self.calls.lock().unwrap().push(state.clone());
        state
    }

    /// Whether any expectation has been declared for this name.
    pub(crate) fn is_mocked(&self, kind: MockKind, name: &str) -> bool {
        self.expected
            .lock()
            .unwrap()
            .contains(&(kind, name.to_string()))
    }

    /// Match an invocation against the declared expectations. The first
    /// matching, unexhausted expectation is consumed.
    pub(crate) fn consume(
        &self,
        kind: MockKind,
        name: &str,
        args: &[Value],
    ) -> Result<MockResolved, String> {
        let calls = self.calls.lock().unwrap();
        for state in calls.iter() {
            let mut state = state.lock().unwrap();
            if state.kind != kind || state.name != name {
                continue;
            }
            if let MockTimes::Exact(limit) = state.times {
                if state.calls >= limit {
                    continue;
                }
            }
            if !state.matcher.matches(args) {
                continue;
            }
            state.calls += 1;
            let returns = state
                .returns
                .clone()
                .ok_or_else(|| format!("mock of {kind} {name} has no returns configured"))?;
            return Ok(MockResolved {
                wait: state.wait,
                run_fn: state.run_fn.clone(),
                returns,
            });
        }
        Err(format!(
            "mock: no matching expectation for {kind} {name} with arguments {args:?} \
             (every matching expectation is exhausted or none was declared for these arguments)"
        ))
    }

    /// Check that every expectation with an exact call count was satisfied.
    pub(crate) fn assert_expectations(&self) -> Result<(), String> {
        let calls = self.calls.lock().unwrap();
        let mut unmet = Vec::new();
        for state in calls.iter() {
            let state = state.lock().unwrap();
            if let MockTimes::Exact(limit) = state.times {
                if state.calls != limit {
                    unmet.push(format!(
                        "{} {} expected {} call(s), got {}",
                        state.kind, state.name, limit, state.calls
                    ));
                }
            }
        }
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(format!("unmet mock expectations: {}", unmet.join("; ")))
        }
    }
}

fn positional_matcher<T: Serialize>(args: &T) -> ArgsMatcher {
    let value = serde_json::to_value(args)
        .unwrap_or_else(|e| panic!("unable to encode mock argument matcher: {e}"));
    let values = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    };
    ArgsMatcher::Values(values)
}

fn to_result_value<T: Serialize>(result: &T) -> Value {
    serde_json::to_value(result).unwrap_or_else(|e| panic!("unable to encode mock return: {e}"))
}

macro_rules! builder_common {
    () => {
        /// Match only invocations whose arguments equal `args` (a tuple for
        /// multi-argument functions).
        pub fn with_args<T: Serialize>(self, args: &T) -> Self {
            self.state.lock().unwrap().matcher = positional_matcher(args);
            self
        }

        /// Suspend the caller for `duration` of virtual time before the
        /// mock's return is delivered.
        pub fn wait(self, duration: Duration) -> Self {
            self.state.lock().unwrap().wait = duration;
            self
        }

        /// Run a side-effect hook just before the return is delivered. The
        /// hook receives the encoded invocation arguments.
        pub fn run<F>(self, f: F) -> Self
        where
            F: Fn(&EncodedValues) + Send + Sync + 'static,
        {
            self.state.lock().unwrap().run_fn = Some(Arc::new(f));
            self
        }

        /// Expect exactly `n` matching invocations.
        pub fn times(self, n: usize) -> Self {
            self.state.lock().unwrap().times = MockTimes::Exact(n);
            self
        }

        /// Expect exactly one matching invocation.
        pub fn once(self) -> Self {
            self.times(1)
        }

        /// Allow any number of matching invocations (the default).
        pub fn any_times(self) -> Self {
            self.state.lock().unwrap().times = MockTimes::Any;
            self
        }

        /// Return `(result, error)` from the mocked function. Passing `()`
        /// as the result configures an error-only return, for functions
        /// without a result besides the error slot.
        pub fn returns<T: Serialize + 'static>(self, result: T, error: Option<TidalError>) -> Self {
            let result = if std::any::TypeId::of::<T>() == std::any::TypeId::of::<()>() {
                None
            } else {
                Some(to_result_value(&result))
            };
            self.state.lock().unwrap().returns = Some(MockReturns::Values { result, error });
            self
        }

        /// Return only an error. Valid only for functions without a result
        /// besides the error slot; the mismatch is reported at invocation.
        pub fn returns_error(self, error: TidalError) -> Self {
            self.state.lock().unwrap().returns = Some(MockReturns::Values {
                result: None,
                error: Some(error),
            });
            self
        }
    };
}

/// Expectation builder for a mocked activity.
pub struct MockActivityBuilder {
    state: Arc<Mutex<MockCallState>>,
}

impl MockActivityBuilder {
    pub(crate) fn new(registry: &MockRegistry, name: &str) -> Self {
        Self {
            state: registry.register(MockKind::Activity, name),
        }
    }

    builder_common!();

    /// Use `entry` as the implementation of the mocked activity.
    pub fn returns_fn(self, entry: ActivityEntry) -> Self {
        self.state.lock().unwrap().returns = Some(MockReturns::ActivityFn(entry));
        self
    }
}

/// Expectation builder for a mocked workflow.
pub struct MockWorkflowBuilder {
    state: Arc<Mutex<MockCallState>>,
}

impl MockWorkflowBuilder {
    pub(crate) fn new(registry: &MockRegistry, name: &str) -> Self {
        Self {
            state: registry.register(MockKind::Workflow, name),
        }
    }

    builder_common!();

    /// Use `entry` as the implementation of the mocked workflow.
    pub fn returns_fn(self, entry: WorkflowEntry) -> Self {
        self.state.lock().unwrap().returns = Some(MockReturns::WorkflowFn(entry));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unmocked_names_are_not_intercepted() {
        let registry = MockRegistry::new();
        assert!(!registry.is_mocked(MockKind::Activity, "anything"));
    }

    #[test]
    fn expectations_match_on_positional_args() {
        let registry = MockRegistry::new();
        MockActivityBuilder::new(&registry, "add")
            .with_args(&(1, 2))
            .returns(3, None);

        assert!(registry
            .consume(MockKind::Activity, "add", &[json!(1), json!(2)])
            .is_ok());
        assert!(registry
            .consume(MockKind::Activity, "add", &[json!(5), json!(5)])
            .is_err());
    }

    #[test]
    fn first_matching_expectation_wins() {
        let registry = MockRegistry::new();
        MockActivityBuilder::new(&registry, "fetch")
            .with_args(&"a")
            .returns("first", None);
        MockActivityBuilder::new(&registry, "fetch").returns("fallback", None);

        let resolved = registry
            .consume(MockKind::Activity, "fetch", &[json!("a")])
            .unwrap();
        match resolved.returns {
            MockReturns::Values { result, .. } => assert_eq!(result, Some(json!("first"))),
            _ => panic!("expected literal returns"),
        }

        let resolved = registry
            .consume(MockKind::Activity, "fetch", &[json!("z")])
            .unwrap();
        match resolved.returns {
            MockReturns::Values { result, .. } => assert_eq!(result, Some(json!("fallback"))),
            _ => panic!("expected literal returns"),
        }
    }

    #[test]
    fn exhausted_expectations_stop_matching() {
        let registry = MockRegistry::new();
        MockActivityBuilder::new(&registry, "ping").once().returns((), None);

        assert!(registry.consume(MockKind::Activity, "ping", &[]).is_ok());
        assert!(registry.consume(MockKind::Activity, "ping", &[]).is_err());
    }

    #[test]
    fn activity_and_workflow_namespaces_are_distinct() {
        let registry = MockRegistry::new();
        MockWorkflowBuilder::new(&registry, "process").returns("done", None);

        assert!(registry.is_mocked(MockKind::Workflow, "process"));
        assert!(!registry.is_mocked(MockKind::Activity, "process"));
    }

    #[test]
    fn assert_expectations_reports_unmet_counts() {
        let registry = MockRegistry::new();
        MockActivityBuilder::new(&registry, "ship").times(2).returns((), None);

        registry.consume(MockKind::Activity, "ship", &[]).unwrap();
        let err = registry.assert_expectations().unwrap_err();
        assert!(err.contains("ship"));
        assert!(err.contains("expected 2"));

        registry.consume(MockKind::Activity, "ship", &[]).unwrap();
        assert!(registry.assert_expectations().is_ok());
    }

    #[test]
    fn expectation_without_returns_is_an_error() {
        let registry = MockRegistry::new();
        MockActivityBuilder::new(&registry, "noop");

        let err = registry.consume(MockKind::Activity, "noop", &[]).unwrap_err();
        assert!(err.contains("no returns configured"));
    }
}
