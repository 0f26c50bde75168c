//! End-to-end tests driving workflows through the virtual-time harness.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tidal_activity::ActivityError;
use tidal_core::{
    factory, is_canceled_error, is_continue_as_new_error, is_entity_not_exists_error,
    is_custom_error, TidalError,
};
use tidal_testkit::{TestSuite, TestWorkflowEnvironment, QUERY_TYPE_STACK_TRACE};
use tidal_worker::{activity_fn, workflow_fn};
use tidal_workflow::{ActivityCallOptions, ChildWorkflowCallOptions, WorkflowContext};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn sleep_then_return_skips_virtual_time() {
    init_tracing();
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "sleeper",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.sleep(Duration::from_secs(3600)).await?;
            Ok::<_, TidalError>("done".to_string())
        }),
    );

    let start_mock = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    env.set_start_time(start_mock);
    let start_wall = Instant::now();
    env.execute_workflow("sleeper", ());

    assert!(start_wall.elapsed() < Duration::from_secs(1));
    assert_eq!(env.now(), start_mock + chrono::Duration::hours(1));
    assert!(env.is_workflow_completed());
    assert_eq!(env.workflow_result::<String>().unwrap(), "done");
}

#[test]
fn mocked_activity_with_wait_duration_advances_virtual_time() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "compute",
        activity_fn(|_ctx, n: i64| async move { Ok::<_, ActivityError>(n * 2) }),
    );
    env.register_workflow(
        "caller",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let value: i64 = ctx.execute_activity("compute", 3i64).await?;
            Ok::<_, TidalError>(value)
        }),
    );
    env.on_activity("compute")
        .with_args(&3i64)
        .wait(Duration::from_secs(30 * 60))
        .returns(7i64, None);

    let start = env.now();
    env.execute_workflow("caller", ());

    assert_eq!(env.workflow_result::<i64>().unwrap(), 7);
    assert!(env.now() - start >= chrono::Duration::minutes(30));
}

#[test]
fn timer_between_two_mocked_activities_observes_one_still_running() {
    init_tracing();
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "slow_a",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(1i64) }),
    );
    env.register_activity(
        "slow_b",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(2i64) }),
    );
    env.on_activity("slow_a").wait(Duration::from_secs(5)).returns(1i64, None);
    env.on_activity("slow_b").wait(Duration::from_secs(10)).returns(2i64, None);
    env.register_workflow(
        "fan_out",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let a = ctx.execute_activity::<_, i64>("slow_a", ());
            let b = ctx.execute_activity::<_, i64>("slow_b", ());
            let (a, b) = futures::join!(a, b);
            Ok::<_, TidalError>(a? + b?)
        }),
    );

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    env.set_on_activity_completed(move |_info, _result, _err| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let observed_at_timer = Arc::new(Mutex::new(None));
    let observed = observed_at_timer.clone();
    let counter = completed.clone();
    env.register_delayed_callback(
        move || {
            *observed.lock().unwrap() = Some(counter.load(Ordering::SeqCst));
        },
        Duration::from_secs(7),
    );

    env.execute_workflow("fan_out", ());

    assert_eq!(env.workflow_result::<i64>().unwrap(), 3);
    // at the 7s mark exactly one of the 5s/10s activities had completed
    assert_eq!(*observed_at_timer.lock().unwrap(), Some(1));
    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

#[test]
fn cancelled_child_workflow_fires_listener_once_and_drops_completion() {
    let env = TestWorkflowEnvironment::new();

    let child_observed_cancel = Arc::new(AtomicBool::new(false));
    let flag = child_observed_cancel.clone();
    env.register_workflow(
        "victim",
        workflow_fn(move |ctx: WorkflowContext, (): ()| {
            let flag = flag.clone();
            async move {
                ctx.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Err::<String, _>(factory::canceled_error())
            }
        }),
    );
    env.register_workflow(
        "parent",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let child = ctx.execute_child_workflow::<_, String>(
                "victim",
                (),
                ChildWorkflowCallOptions::default(),
            );
            let child_id = child.execution().expect("child identity").workflow_id;
            // let the child reach its first suspension point
            ctx.sleep(Duration::from_secs(1)).await?;
            let _ = ctx.request_cancel_workflow(&child_id);
            ctx.sleep(Duration::from_secs(1)).await?;
            Ok::<_, TidalError>("parent-done".to_string())
        }),
    );

    let canceled = Arc::new(AtomicUsize::new(0));
    let counter = canceled.clone();
    env.set_on_child_workflow_canceled(move |_info| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    env.set_on_child_workflow_completed(move |_info, _result, _err| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("parent", ());

    assert_eq!(env.workflow_result::<String>().unwrap(), "parent-done");
    assert_eq!(canceled.load(Ordering::SeqCst), 1);
    assert!(child_observed_cancel.load(Ordering::SeqCst));
    // the post-cancel completion left the registry before it was delivered
    assert_eq!(completed.load(Ordering::SeqCst), 0);
}

#[test]
#[should_panic(expected = "test timeout")]
fn workflow_stuck_on_a_signal_hits_the_test_timeout() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "stuck",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let never = ctx.signal_channel("never-sent");
            never.recv().await;
            Ok::<_, TidalError>(())
        }),
    );
    env.set_test_timeout(Duration::from_millis(300));
    env.execute_workflow("stuck", ());
}

#[test]
fn pending_activity_resumes_through_out_of_band_completion() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "async_work",
        activity_fn(|_ctx, (): ()| async move {
            Err::<String, _>(ActivityError::ResultPending)
        }),
    );
    env.register_workflow(
        "waiter",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let value: String = ctx.execute_activity("async_work", ()).await?;
            Ok::<_, TidalError>(value)
        }),
    );

    let completer = env.clone();
    env.set_on_activity_completed(move |info, _result, err| {
        if matches!(err, Some(TidalError::ResultPending)) {
            completer
                .complete_activity(&info.task_token, Some("ok"), None)
                .expect("complete pending activity");
        }
    });

    env.execute_workflow("waiter", ());
    assert_eq!(env.workflow_result::<String>().unwrap(), "ok");
}

#[test]
fn timer_only_workflows_are_deterministic() {
    fn run_once() -> (Option<Vec<u8>>, Vec<String>) {
        let env = TestWorkflowEnvironment::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        env.set_on_timer_scheduled(move |id, duration| {
            sink.lock().unwrap().push(format!("scheduled:{id}:{duration:?}"));
        });
        let sink = events.clone();
        env.set_on_timer_fired(move |id| {
            sink.lock().unwrap().push(format!("fired:{id}"));
        });

        env.register_workflow(
            "two_sleeps",
            workflow_fn(|ctx: WorkflowContext, (): ()| async move {
                ctx.sleep(Duration::from_secs(10)).await?;
                ctx.sleep(Duration::from_secs(5)).await?;
                Ok::<_, TidalError>(ctx.now().timestamp())
            }),
        );
        env.execute_workflow("two_sleeps", ());

        let events = events.lock().unwrap().clone();
        (env.workflow_result_bytes(), events)
    }

    assert_eq!(run_once(), run_once());
}

#[test]
fn signals_are_delivered_in_post_order() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "collector",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let events = ctx.signal_channel("evt");
            let mut seen = Vec::new();
            while seen.len() < 3 {
                let payload = events.recv().await.expect("signal payload");
                let value: i64 = serde_json::from_slice(&payload)
                    .map_err(|e| TidalError::Serialization(e.to_string()))?;
                seen.push(value);
            }
            Ok::<_, TidalError>(seen)
        }),
    );

    let sender = env.clone();
    env.register_delayed_callback(
        move || {
            sender.signal_workflow("evt", 1i64);
            sender.signal_workflow("evt", 2i64);
            sender.signal_workflow("evt", 3i64);
        },
        Duration::from_secs(1),
    );

    env.execute_workflow("collector", ());
    assert_eq!(env.workflow_result::<Vec<i64>>().unwrap(), vec![1, 2, 3]);
}

#[test]
fn equal_duration_timers_fire_in_schedule_order() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "twin_timers",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let first = ctx.new_timer(Duration::from_secs(5));
            let second = ctx.new_timer(Duration::from_secs(5));
            let (a, b) = futures::join!(first, second);
            a?;
            b?;
            Ok::<_, TidalError>(())
        }),
    );

    let scheduled = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = scheduled.clone();
    env.set_on_timer_scheduled(move |id, _| sink.lock().unwrap().push(id.to_string()));
    let sink = fired.clone();
    env.set_on_timer_fired(move |id| sink.lock().unwrap().push(id.to_string()));

    env.execute_workflow("twin_timers", ());

    let scheduled = scheduled.lock().unwrap().clone();
    let fired = fired.lock().unwrap().clone();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(scheduled, fired);
}

#[test]
fn double_activity_cancel_produces_one_cancellation() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "slow",
        activity_fn(|_ctx, (): ()| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ActivityError>(1i64)
        }),
    );
    env.register_workflow(
        "cancel_twice",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let pending = ctx.execute_activity::<_, i64>("slow", ());
            let id = pending.activity_id().to_string();
            ctx.cancel_activity(&id);
            ctx.cancel_activity(&id);
            match pending.await {
                Err(e) if is_canceled_error(&e) => Ok::<_, TidalError>("canceled".to_string()),
                other => Ok(format!("unexpected: {other:?}")),
            }
        }),
    );

    let canceled = Arc::new(AtomicUsize::new(0));
    let counter = canceled.clone();
    env.set_on_activity_canceled(move |_info| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("cancel_twice", ());
    assert_eq!(env.workflow_result::<String>().unwrap(), "canceled");
    assert_eq!(canceled.load(Ordering::SeqCst), 1);
}

#[test]
fn double_timer_cancel_produces_one_cancellation() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "timer_cancel",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let timer = ctx.new_timer(Duration::from_secs(60));
            let id = timer.timer_id().to_string();
            ctx.cancel_timer(&id);
            ctx.cancel_timer(&id);
            match timer.await {
                Err(e) if is_canceled_error(&e) => Ok::<_, TidalError>("canceled".to_string()),
                other => Ok(format!("unexpected: {other:?}")),
            }
        }),
    );

    let cancelled = Arc::new(AtomicUsize::new(0));
    let counter = cancelled.clone();
    env.set_on_timer_cancelled(move |_id| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("timer_cancel", ());
    assert_eq!(env.workflow_result::<String>().unwrap(), "canceled");
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}

#[test]
fn heartbeat_for_untracked_activity_reports_entity_not_exists() {
    let suite = TestSuite::new();
    suite.register_activity(
        "beater",
        activity_fn(|ctx: tidal_activity::ActivityContext, (): ()| async move {
            // one-shot executions are not tracked in the live-activity map
            match ctx.record_heartbeat(None) {
                Err(e) if is_entity_not_exists_error(&e) => {
                    Ok::<_, ActivityError>("not-found".to_string())
                }
                other => Ok(format!("unexpected: {other:?}")),
            }
        }),
    );

    let activity_env = suite.new_test_activity_environment();
    let outcome: String = activity_env.execute_activity("beater", ()).unwrap();
    assert_eq!(outcome, "not-found");
}

#[test]
fn heartbeats_of_live_activities_reach_the_listener() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "beating",
        activity_fn(|ctx: tidal_activity::ActivityContext, (): ()| async move {
            ctx.record_heartbeat(Some(b"50%".to_vec()))
                .map_err(|e| ActivityError::application(e.to_string(), None))?;
            Ok::<_, ActivityError>(())
        }),
    );
    env.register_workflow(
        "heartbeat_flow",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.execute_activity::<_, ()>("beating", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );

    let beats = Arc::new(AtomicUsize::new(0));
    let counter = beats.clone();
    env.set_on_activity_heartbeat(move |_info, _details| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("heartbeat_flow", ());
    assert!(env.workflow_error().is_none());
    assert_eq!(beats.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "incorrect number of returns")]
fn mock_return_arity_mismatch_aborts_the_test() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "valued",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(1i64) }),
    );
    env.register_workflow(
        "arity",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let _: i64 = ctx.execute_activity("valued", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );
    // error-only return spec against a function that also returns a value
    env.on_activity("valued")
        .returns_error(factory::generic_error("nope"));

    env.execute_workflow("arity", ());
}

#[test]
fn unmocked_activities_run_their_real_implementation() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "echo",
        activity_fn(|_ctx, text: String| async move {
            Ok::<_, ActivityError>(format!("echo: {text}"))
        }),
    );
    env.register_workflow(
        "echoer",
        workflow_fn(|ctx: WorkflowContext, text: String| async move {
            let out: String = ctx.execute_activity("echo", text).await?;
            Ok::<_, TidalError>(out)
        }),
    );

    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    env.set_on_activity_started(move |_info, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("echoer", "hi".to_string());
    assert_eq!(env.workflow_result::<String>().unwrap(), "echo: hi");
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[test]
fn activity_failures_surface_as_structured_errors() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "flaky",
        activity_fn(|_ctx, (): ()| async move {
            Err::<(), _>(ActivityError::application(
                "downstream-unavailable",
                Some(b"gateway 502".to_vec()),
            ))
        }),
    );
    env.register_workflow(
        "failing",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.execute_activity::<_, ()>("flaky", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );

    env.execute_workflow("failing", ());
    let err = env.workflow_error().expect("workflow error");
    assert!(is_custom_error(&err));
    assert!(err.to_string().contains("downstream-unavailable"));
}

#[test]
#[should_panic(expected = "unable to find activity type")]
fn task_list_restricted_activity_is_invisible_on_other_lists() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "pinned",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(1i64) }),
    );
    env.set_activity_task_list("special-list", &["pinned"]);
    env.register_workflow(
        "wrong_list",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            // dispatched on the default task list, where "pinned" is not allowed
            let _: i64 = ctx.execute_activity("pinned", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );

    env.execute_workflow("wrong_list", ());
}

#[test]
fn task_list_restricted_activity_resolves_on_its_own_list() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "pinned",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(5i64) }),
    );
    env.set_activity_task_list("special-list", &["pinned"]);
    env.register_workflow(
        "right_list",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let options = ActivityCallOptions {
                task_list: Some("special-list".to_string()),
                ..ActivityCallOptions::default()
            };
            let value: i64 = ctx
                .execute_activity_with_options("pinned", (), options)
                .await?;
            Ok::<_, TidalError>(value)
        }),
    );

    env.execute_workflow("right_list", ());
    assert_eq!(env.workflow_result::<i64>().unwrap(), 5);
}

#[test]
fn side_effects_and_versions_are_deterministic_in_tests() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "versioned",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let seed: i64 = ctx.side_effect(|| 41)?;
            let first = ctx.get_version("add-retries", 0, 2);
            let second = ctx.get_version("add-retries", 1, 3);
            Ok::<_, TidalError>((seed + 1, first, second))
        }),
    );

    env.execute_workflow("versioned", ());
    let (value, first, second) = env.workflow_result::<(i64, i32, i32)>().unwrap();
    assert_eq!(value, 42);
    // the first request locks in the maximum supported version
    assert_eq!(first, 2);
    assert_eq!(second, 2);
}

#[test]
fn queries_answer_after_completion_without_mutating_state() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "query_wf",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.set_query_handler("status", |(): ()| Ok("running".to_string()));
            ctx.sleep(Duration::from_secs(1)).await?;
            Ok::<_, TidalError>(())
        }),
    );

    env.execute_workflow("query_wf", ());

    let status: String = env.query_workflow("status", ()).unwrap();
    assert_eq!(status, "running");

    let err = env.query_workflow::<_, String>("nope", ()).unwrap_err();
    assert!(err.to_string().contains("unknown query type"));

    let stack: String = env.query_workflow(QUERY_TYPE_STACK_TRACE, ()).unwrap();
    assert!(stack.contains("query_wf"));
}

#[test]
fn continue_as_new_is_carried_to_the_test() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "restarting",
        workflow_fn(|ctx: WorkflowContext, n: i64| async move {
            Err::<(), _>(ctx.continue_as_new_error(n + 1))
        }),
    );

    env.execute_workflow("restarting", 1i64);
    let err = env.workflow_error().expect("workflow error");
    assert!(is_continue_as_new_error(&err));
}

#[test]
fn workflows_execute_by_alias_or_original_name() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow_with_alias(
        "crate::flows::greet",
        "greet",
        workflow_fn(|_ctx: WorkflowContext, (): ()| async move {
            Ok::<_, TidalError>("hello".to_string())
        }),
    );

    env.execute_workflow("crate::flows::greet", ());
    assert_eq!(env.workflow_result::<String>().unwrap(), "hello");
    assert_eq!(env.workflow_info().workflow_type.name, "greet");
}

#[test]
fn mocked_workflow_returns_without_running_the_body() {
    let env = TestWorkflowEnvironment::new();
    let body_ran = Arc::new(AtomicBool::new(false));
    let flag = body_ran.clone();
    env.register_workflow(
        "wrapped",
        workflow_fn(move |_ctx: WorkflowContext, (): ()| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, TidalError>("real".to_string())
            }
        }),
    );
    env.on_workflow("wrapped")
        .wait(Duration::from_secs(60))
        .returns("mocked".to_string(), None);

    let start = env.now();
    env.execute_workflow("wrapped", ());

    assert_eq!(env.workflow_result::<String>().unwrap(), "mocked");
    assert!(!body_ran.load(Ordering::SeqCst));
    assert!(env.now() - start >= chrono::Duration::minutes(1));
}

#[test]
fn mocked_child_workflow_returns_the_programmed_value() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "sub",
        workflow_fn(|_ctx: WorkflowContext, (): ()| async move { Ok::<_, TidalError>(1i64) }),
    );
    env.register_workflow(
        "outer",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let value: i64 = ctx
                .execute_child_workflow("sub", (), ChildWorkflowCallOptions::default())
                .await?;
            Ok::<_, TidalError>(value)
        }),
    );
    env.on_workflow("sub").returns(99i64, None);

    env.execute_workflow("outer", ());
    assert_eq!(env.workflow_result::<i64>().unwrap(), 99);
}

#[test]
fn child_workflow_result_reaches_the_parent_and_listeners() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "adder",
        workflow_fn(|_ctx: WorkflowContext, n: i64| async move { Ok::<_, TidalError>(n + 1) }),
    );
    env.register_workflow(
        "delegating",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let value: i64 = ctx
                .execute_child_workflow("adder", 41i64, ChildWorkflowCallOptions::default())
                .await?;
            Ok::<_, TidalError>(value)
        }),
    );

    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    env.set_on_child_workflow_started(move |_info, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = completed.clone();
    env.set_on_child_workflow_completed(move |_info, _result, _err| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    env.execute_workflow("delegating", ());
    assert_eq!(env.workflow_result::<i64>().unwrap(), 42);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn run_hooks_fire_before_the_mock_returns() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "notify",
        activity_fn(|_ctx, _message: String| async move { Ok::<_, ActivityError>(()) }),
    );
    env.register_workflow(
        "notifier",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.execute_activity::<_, ()>("notify", "payload".to_string()).await?;
            Ok::<_, TidalError>(())
        }),
    );

    let seen_args = Arc::new(Mutex::new(None));
    let sink = seen_args.clone();
    env.on_activity("notify")
        .run(move |args| {
            *sink.lock().unwrap() = Some(args.positional().unwrap());
        })
        .returns((), None);

    env.execute_workflow("notifier", ());
    assert!(env.workflow_error().is_none());
    assert_eq!(
        *seen_args.lock().unwrap(),
        Some(vec![serde_json::json!("payload")])
    );
}

#[test]
fn activity_mocks_can_delegate_to_a_replacement_function() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "triple",
        activity_fn(|_ctx, n: i64| async move { Ok::<_, ActivityError>(n * 3) }),
    );
    env.register_workflow(
        "tripler",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            let value: i64 = ctx.execute_activity("triple", 14i64).await?;
            Ok::<_, TidalError>(value)
        }),
    );
    // swap the implementation instead of returning a literal
    env.on_activity("triple").returns_fn(activity_fn(|_ctx, n: i64| async move {
        Ok::<_, ActivityError>(n + 1)
    }));

    env.execute_workflow("tripler", ());
    assert_eq!(env.workflow_result::<i64>().unwrap(), 15);
}

#[test]
fn workflow_mocks_can_delegate_to_a_replacement_function() {
    let env = TestWorkflowEnvironment::new();
    env.register_workflow(
        "original",
        workflow_fn(|_ctx: WorkflowContext, (): ()| async move {
            Ok::<_, TidalError>("original".to_string())
        }),
    );
    env.on_workflow("original").returns_fn(workflow_fn(
        |_ctx: WorkflowContext, (): ()| async move {
            Ok::<_, TidalError>("replacement".to_string())
        },
    ));

    env.execute_workflow("original", ());
    assert_eq!(env.workflow_result::<String>().unwrap(), "replacement");
}

#[test]
fn satisfied_expectations_pass_the_assertion() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "ping",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(()) }),
    );
    env.register_workflow(
        "pinger",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.execute_activity::<_, ()>("ping", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );
    env.on_activity("ping").once().returns((), None);

    env.execute_workflow("pinger", ());
    env.assert_expectations();
}

#[test]
#[should_panic(expected = "unmet mock expectations")]
fn unmet_expectations_fail_the_assertion() {
    let env = TestWorkflowEnvironment::new();
    env.register_activity(
        "ping",
        activity_fn(|_ctx, (): ()| async move { Ok::<_, ActivityError>(()) }),
    );
    env.register_workflow(
        "single_pinger",
        workflow_fn(|ctx: WorkflowContext, (): ()| async move {
            ctx.execute_activity::<_, ()>("ping", ()).await?;
            Ok::<_, TidalError>(())
        }),
    );
    env.on_activity("ping").times(2).returns((), None);

    env.execute_workflow("single_pinger", ());
    env.assert_expectations();
}

#[test]
fn one_shot_activity_execution_round_trips_typed_values() {
    let suite = TestSuite::new();
    suite.register_activity(
        "sum",
        activity_fn(|_ctx, (a, b): (i64, i64)| async move { Ok::<_, ActivityError>(a + b) }),
    );

    let activity_env = suite.new_test_activity_environment();
    let total: i64 = activity_env.execute_activity("sum", (19, 23)).unwrap();
    assert_eq!(total, 42);
}
