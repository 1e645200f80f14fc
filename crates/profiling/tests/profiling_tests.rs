//! Integration tests for the profiling engine
//!
//! These drive profiles through the public API only: descriptors built or
//! loaded from JSON, constructed by a factory, nested through execution
//! contexts, and observed through a memory sink and a manual clock.

use profiling::{
    Accumulator, Action, Condition, FailureStage, ManualClock, MemorySink, ProfileContext, ProfileDescriptor,
    ProfileError, ProfileFactory, ProfileKind, ProfileRegistry, ProfileState, Profiler, ProfilerConfig,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Factory wired to in-memory collaborators
struct Harness {
    factory: ProfileFactory,
    sink: Arc<MemorySink>,
    clock: Arc<ManualClock>,
    accumulator: Arc<Accumulator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ProfilerConfig::default())
    }

    fn with_config(config: ProfilerConfig) -> Self {
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new());
        let accumulator = Arc::new(Accumulator::new());
        let factory = ProfileFactory::new(config)
            .with_sink(sink.clone())
            .with_clock(clock.clone())
            .with_accumulator(accumulator.clone());
        Self {
            factory,
            sink,
            clock,
            accumulator,
        }
    }

    fn descriptor(&self, name: &str, message: &str) -> Arc<ProfileDescriptor> {
        Arc::new(ProfileDescriptor::builder().name(name).message(message).build().unwrap())
    }
}

#[test]
fn test_load_user_report() {
    let h = Harness::new();
    let descriptor = h.descriptor("LoadUser", "Loading {UserId}");
    let target = json!({"UserId": 42});
    let cx = ProfileContext::new();

    {
        let guard = h.factory.enter(&descriptor, Some(&target), &cx);
        assert!(guard.is_active());
        assert_eq!(guard.message(), "Loading 42");
        h.clock.advance(Duration::from_millis(3));
    }

    let reports = h.sink.reports_named("LoadUser");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message, "Loading 42");
    assert_eq!(reports[0].elapsed, Duration::from_millis(3));
    assert_eq!(reports[0].to_text(), "LoadUser: Loading 42 (3ms)");
}

#[test]
fn test_inactive_profile_never_touches_target() {
    let h = Harness::new();
    let descriptor = Arc::new(
        ProfileDescriptor::builder()
            .condition(false)
            .message("{Missing.Deep.Path}")
            .on_start(Action::new("never", |_| panic!("hook must not run")))
            .build()
            .unwrap(),
    );
    let cx = ProfileContext::new();

    {
        let mut guard = h.factory.enter(&descriptor, None, &cx);
        assert_eq!(guard.kind(), ProfileKind::Inactive);
        assert!(cx.is_empty());
        guard.append("ignored");
    }

    assert!(h.sink.reports().is_empty());
    assert!(h.sink.failures().is_empty());
}

#[test]
fn test_nested_profiles_restore_outer() {
    let h = Harness::new();
    let cx = ProfileContext::new();

    let a = h.factory.enter(&h.descriptor("A", ""), None, &cx);
    let a_id = a.id().unwrap();
    {
        let b = h.factory.enter(&h.descriptor("B", ""), None, &cx);
        assert_eq!(b.outer().unwrap().id(), a_id);
        assert_eq!(cx.current().unwrap().id(), b.id().unwrap());
    }
    assert_eq!(cx.current().unwrap().id(), a_id);
    drop(a);
    assert!(cx.current().is_none());

    let b_report = &h.sink.reports_named("B")[0];
    assert_eq!(b_report.depth, 1);
    assert_eq!(b_report.outer_name.as_deref(), Some("A"));
}

#[test]
fn test_out_of_order_release_keeps_unrelated_entries() {
    let h = Harness::new();
    let cx = ProfileContext::new();

    let a = h.factory.enter(&h.descriptor("A", ""), None, &cx);
    let b = h.factory.enter(&h.descriptor("B", ""), None, &cx);
    let b_id = b.id().unwrap();

    let err = a.finish().unwrap_err();
    assert!(matches!(err, ProfileError::UnbalancedStop { top: Some(top), .. } if top == b_id));
    assert_eq!(cx.stack(), vec![b_id]);

    drop(b);
    assert!(cx.is_empty());
    assert_eq!(h.sink.failures().len(), 1);
    assert_eq!(h.sink.failures()[0].stage, FailureStage::Nesting);
}

#[test]
fn test_hook_failures_do_not_reach_profiled_code() {
    let h = Harness::new();
    let descriptor = Arc::new(
        ProfileDescriptor::builder()
            .name("Checkout")
            .condition(Condition::try_when(|_| Ok(true)))
            .on_start(Action::new("audit", |_| anyhow::bail!("audit log unavailable")))
            .on_stop(Action::new("metrics", |_| panic!("metrics exploded")))
            .build()
            .unwrap(),
    );

    let result: Result<u32, String> = {
        let _guard = h.factory.enter(&descriptor, None, &ProfileContext::new());
        Ok(7)
    };

    assert_eq!(result, Ok(7));
    let stages: Vec<_> = h.sink.failures().into_iter().map(|f| f.stage).collect();
    assert_eq!(
        stages,
        vec![
            FailureStage::StartHook("audit".into()),
            FailureStage::StopHook("metrics".into())
        ]
    );
    assert_eq!(h.sink.reports_named("Checkout").len(), 1);
}

#[test]
fn test_failures_not_forwarded_when_disabled() {
    let h = Harness::with_config(ProfilerConfig::default().with_report_failures(false));
    let descriptor = Arc::new(
        ProfileDescriptor::builder()
            .on_start(Action::new("broken", |_| anyhow::bail!("nope")))
            .build()
            .unwrap(),
    );
    drop(h.factory.enter(&descriptor, None, &ProfileContext::new()));
    assert!(h.sink.failures().is_empty());
    assert_eq!(h.sink.reports().len(), 1);
}

#[test]
fn test_contexts_on_different_threads_do_not_nest() {
    let h = Harness::new();
    let outer = h.factory.enter(&h.descriptor("MainThread", ""), None, &ProfileContext::ambient());

    let factory = h.factory.clone();
    let descriptor = h.descriptor("Worker", "");
    let outer_seen = thread::spawn(move || {
        let guard = factory.enter(&descriptor, None, &ProfileContext::ambient());
        guard.outer().map(|o| o.id())
    })
    .join()
    .unwrap();

    assert_eq!(outer_seen, None);
    assert_eq!(ProfileContext::ambient().current().unwrap().id(), outer.id().unwrap());
    drop(outer);
    assert!(ProfileContext::ambient().is_empty());
}

#[test]
fn test_buffered_totals_across_threads() {
    let h = Harness::new();
    let descriptor = Arc::new(ProfileDescriptor::builder().name("Batch").buffered(true).build().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let clock = Arc::new(ManualClock::new());
            let factory = h.factory.clone().with_clock(clock.clone());
            let descriptor = Arc::clone(&descriptor);
            thread::spawn(move || {
                for _ in 0..10 {
                    let _guard = factory.enter(&descriptor, None, &ProfileContext::ambient());
                    clock.advance(Duration::from_millis(2));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = h.accumulator.snapshot("Batch").unwrap();
    assert_eq!(snapshot.count, 40);
    assert_eq!(snapshot.total, Duration::from_millis(80));
    assert_eq!(snapshot.mean(), Duration::from_millis(2));
    assert_eq!(h.sink.reports().len(), 40);
}

#[test]
fn test_buffered_lines_emitted_on_stop() {
    let h = Harness::new();
    let descriptor = Arc::new(
        ProfileDescriptor::builder()
            .name("Import")
            .message("{Rows} rows")
            .buffered(true)
            .build()
            .unwrap(),
    );
    let target = json!({"Rows": 3});

    {
        let mut guard = h.factory.enter(&descriptor, Some(&target), &ProfileContext::new());
        for row in 0..3 {
            guard.append(format!("row {}", row));
            h.clock.advance(Duration::from_millis(1));
            guard.as_buffered_mut().unwrap().lap();
        }
        assert!(h.sink.reports().is_empty());
    }

    let report = &h.sink.reports()[0];
    assert_eq!(report.lines, vec!["row 0", "row 1", "row 2"]);
    // three laps plus the (empty) final measurement
    assert_eq!(report.accumulated.as_ref().unwrap().count, 4);
    assert_eq!(report.accumulated.as_ref().unwrap().total, Duration::from_millis(3));
    assert!(h.sink.lines().is_empty());
}

#[test]
fn test_delayed_start_through_profiler() {
    let h = Harness::new();
    let mut profiler = Profiler::new(ProfilerConfig::default()).with_factory(h.factory.clone());
    profiler.register("jobs::run", ProfileDescriptor::builder().name("Run").delayed_start(true).build().unwrap());

    let cx = ProfileContext::new();
    let mut scope = profiler.enter_in(&cx, "jobs::run", None).unwrap();
    assert_eq!(scope.innermost().unwrap().state(), ProfileState::Created);
    assert!(cx.is_empty());

    h.clock.advance(Duration::from_millis(10));
    scope.innermost_mut().unwrap().start().unwrap();
    h.clock.advance(Duration::from_millis(1));
    scope.finish().unwrap();

    assert_eq!(h.sink.reports_named("Run")[0].elapsed, Duration::from_millis(1));
}

#[test]
fn test_registry_from_json_end_to_end() {
    let h = Harness::new();
    let registry = ProfileRegistry::from_json(
        r#"[
            {"key": "orders::submit", "name": "Submit", "message": "Order {Order.Id} for {Customer}"},
            {"key": "orders::submit", "name": "SubmitTotals", "buffered": true},
            {"key": "orders::audit", "name": "Audit", "enabled": false}
        ]"#,
    )
    .unwrap();
    let profiler = Profiler::new(ProfilerConfig::default())
        .with_registry(registry)
        .with_factory(h.factory.clone());

    let target = json!({"Order": {"Id": 981}, "Customer": "ACME"});
    let cx = ProfileContext::new();
    {
        let _submit = profiler.enter_in(&cx, "orders::submit", Some(&target)).unwrap();
        let audit = profiler.enter_in(&cx, "orders::audit", Some(&target)).unwrap();
        assert!(!audit.innermost().unwrap().is_active());
        assert_eq!(cx.depth(), 2);
        h.clock.advance(Duration::from_millis(5));
    }

    let submit = &h.sink.reports_named("Submit")[0];
    assert_eq!(submit.message, "Order 981 for ACME");
    let totals = &h.sink.reports_named("SubmitTotals")[0];
    assert_eq!(totals.depth, 1);
    assert_eq!(totals.outer_name.as_deref(), Some("Submit"));
    assert!(h.sink.reports_named("Audit").is_empty());

    let exported = h.sink.export_json().unwrap();
    assert!(exported.contains("\"outerName\": \"Submit\""));
    assert!(matches!(
        profiler.enter_in(&cx, "orders::refund", None),
        Err(ProfileError::UnknownKey(_))
    ));
}

#[test]
fn test_replacer_consulted_before_target() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let h = Harness::new();
    let factory = h.factory.clone().with_replacer(
        move |_: Option<&dyn profiling::PropertySource>, path: &profiling::PropertyPath| -> Option<String> {
            counter.fetch_add(1, Ordering::SeqCst);
            (path.as_str() == "Now").then(|| "<now>".to_string())
        },
    );

    let descriptor = h.descriptor("Tick", "{Now} / {Count}");
    let profile = factory.construct_profile(&descriptor, Some(&json!({"Count": 2})), None, &ProfileContext::new());
    assert_eq!(profile.message(), "<now> / 2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn test_task_contexts_are_isolated() {
    let h = Harness::new();
    let descriptor = h.descriptor("Task", "");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let factory = h.factory.clone();
        let descriptor = Arc::clone(&descriptor);
        tasks.push(tokio::spawn(ProfileContext::new().scope(async move {
            let cx = ProfileContext::ambient();
            let outer = factory.enter(&descriptor, None, &cx);
            tokio::task::yield_now().await;
            let inner = factory.enter(&descriptor, None, &ProfileContext::ambient());
            let nested_under_own = inner.outer().map(|o| o.id()) == outer.id();
            drop(inner);
            drop(outer);
            nested_under_own && cx.is_empty()
        })));
    }

    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(h.sink.reports().len(), 8);
}
