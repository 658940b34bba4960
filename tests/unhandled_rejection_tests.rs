use promise_engine::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::time::Duration;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

fn recording_runtime() -> (Runtime, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let rt = Runtime::builder().reporter(reporter.clone()).build();
    (rt, reporter)
}

#[cfg(test)]
mod unhandled_rejection_tests {
    use super::*;

    #[test]
    fn test_dropped_unobserved_rejection_is_reported_once() {
        let (mut rt, reporter) = recording_runtime();
        let p = Promise::reject(&rt.main(), Value::error("Error", "lost"));
        let id = p.id();
        rt.run_until_idle();
        assert!(reporter.is_empty(), "nothing is reported while the promise is alive");

        drop(p);
        rt.run_until_idle();
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].promise_id, id);
        assert_eq!(reports[0].context, ContextId::MAIN);
        assert_eq!(reports[0].context_name, "main");
        assert_eq!(reports[0].reason, Value::error("Error", "lost"));
        assert!(!reports[0].is_privileged);

        rt.run_until_idle();
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_late_catch_suppresses_report() {
        let (mut rt, reporter) = recording_runtime();
        let p = Promise::reject(&rt.main(), Value::error("Error", "handled later"));
        rt.run_until_idle();

        let handled = p.catch(Some(Handler::new(|_| Ok(Value::Undefined))));
        rt.run_until_idle();
        assert_eq!(handled.state(), PromiseState::Rejected);
        assert_eq!(handled.result(), Some(Value::Undefined));

        drop(p);
        drop(handled);
        rt.run_until_idle();
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_rejection_forwarded_down_a_chain_is_reported_by_the_tail() {
        let (mut rt, reporter) = recording_runtime();
        let head = Promise::reject(&rt.main(), Value::type_error("deep"));
        let tail = head.then(None, None).then(None, None);
        let tail_id = tail.id();
        rt.run_until_idle();

        drop(head);
        drop(tail);
        rt.run_until_idle();
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].promise_id, tail_id);
    }

    #[test]
    fn test_non_error_reason_is_not_reported() {
        let (mut rt, reporter) = recording_runtime();
        let ctx = rt.main();
        let a = Promise::reject(&ctx, "just a string");
        let b = Promise::reject(&ctx, 404);
        let c = Promise::reject(&ctx, Value::Undefined);
        rt.run_until_idle();
        drop((a, b, c));
        rt.run_until_idle();
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_fulfilled_and_pending_promises_are_not_reported() {
        let (mut rt, reporter) = recording_runtime();
        let ctx = rt.main();
        let fulfilled = Promise::resolve(&ctx, Value::error("Error", "a value, not a reason"));
        let pending = Promise::pending(&ctx);
        rt.run_until_idle();
        drop((fulfilled, pending));
        rt.run_until_idle();
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_privileged_context_is_flagged() {
        let reporter = Arc::new(RecordingReporter::new());
        let mut rt = Runtime::builder()
            .reporter(reporter.clone())
            .main_name("chrome")
            .main_privileged(true)
            .build();
        let p = Promise::reject(&rt.main(), Value::error("Error", "privileged"));
        rt.run_until_idle();
        drop(p);
        rt.run_until_idle();

        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_privileged);
        assert_eq!(reports[0].context_name, "chrome");
        assert!(reports[0].to_string().starts_with("Uncaught (in promise) Error: privileged"));
    }

    #[test]
    fn test_worker_rejection_is_reported_on_main() {
        let (mut rt, reporter) = recording_runtime();
        let worker = rt.spawn_worker("reporter-test", false).unwrap();
        let worker_ctx = worker.clone();
        worker
            .dispatch(move || {
                // Created, rejected and dropped entirely on the worker.
                let _p = Promise::reject(&worker_ctx, Value::error("Error", "from worker"));
            })
            .unwrap();

        let reporter2 = reporter.clone();
        assert!(rt.run_until(Duration::from_secs(5), || reporter2.len() == 1));
        let reports = reporter.take();
        assert_eq!(reports[0].context, worker.id());
        assert_eq!(reports[0].context_name, "reporter-test");
        assert_eq!(reports[0].reason, Value::error("Error", "from worker"));
        rt.shutdown().unwrap();
    }

    #[test]
    fn test_report_is_synchronous_after_runtime_teardown() {
        let (mut rt, reporter) = recording_runtime();
        let p = Promise::reject(&rt.main(), Value::error("Error", "outlived"));
        rt.run_until_idle();
        drop(rt);

        assert!(reporter.is_empty());
        drop(p);
        assert_eq!(reporter.len(), 1);
    }

    struct CountingHooks {
        live: AtomicIsize,
        retains: AtomicUsize,
    }

    impl ValueHooks for CountingHooks {
        fn retain(&self, _value: &Value) {
            self.live.fetch_add(1, Ordering::SeqCst);
            self.retains.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self, _value: &Value) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }

        fn is_error_like(&self, value: &Value) -> bool {
            matches!(value, Value::Error(_) | Value::String(_))
        }
    }

    #[test]
    fn test_retain_and_release_are_balanced() {
        let hooks = Arc::new(CountingHooks {
            live: AtomicIsize::new(0),
            retains: AtomicUsize::new(0),
        });
        let reporter = Arc::new(RecordingReporter::new());
        let mut rt = Runtime::builder().value_hooks(hooks.clone()).reporter(reporter.clone()).build();
        let ctx = rt.main();

        let ok = Promise::resolve(&ctx, 1).then(Some(Handler::new(|v| Ok(v))), None);
        let failed = Promise::reject(&ctx, "string reason");
        rt.run_until_idle();
        assert!(hooks.live.load(Ordering::SeqCst) > 0);

        drop(ok);
        drop(failed);
        rt.run_until_idle();
        assert_eq!(hooks.live.load(Ordering::SeqCst), 0);
        assert!(hooks.retains.load(Ordering::SeqCst) >= 3);
        // The custom predicate treats strings as error-like.
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_undefined_reason_is_never_reported() {
        let hooks = Arc::new(CountingHooks {
            live: AtomicIsize::new(0),
            retains: AtomicUsize::new(0),
        });
        let reporter = Arc::new(RecordingReporter::new());
        let mut rt = Runtime::builder().value_hooks(hooks).reporter(reporter.clone()).build();
        let p = Promise::reject(&rt.main(), Value::Undefined);
        rt.run_until_idle();
        drop(p);
        rt.run_until_idle();
        assert!(reporter.is_empty());
    }
}
