use criterion::{Criterion, criterion_group, criterion_main};
use promise_engine::{Handler, Promise, Runtime, Value};
use std::hint::black_box;
use std::time::Duration;

// cargo bench --profile dev

// Initialize logger for benchmark so `RUST_LOG` is honored.
#[ctor::ctor]
fn __init_bench_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).try_init();
}

fn benchmark_promise_operations(c: &mut Criterion) {
    let mut rt = Runtime::new();
    let ctx = rt.main();

    // Basic creation and resolution
    c.bench_function("promise_basic_resolution", |b| {
        b.iter(|| {
            let p = Promise::resolve(&ctx, 42);
            let child = p.then(Some(Handler::new(|v| Ok(Value::from(v.as_number().unwrap_or_default() * 2.0)))), None);
            rt.run_until_idle();
            black_box(child.result())
        })
    });

    c.bench_function("promise_chaining", |b| {
        b.iter(|| {
            let mut p = Promise::resolve(&ctx, 1);
            for step in [1.0, 2.0, -3.0, 0.5] {
                p = p.then(
                    Some(Handler::new(move |v| Ok(Value::from(v.as_number().unwrap_or_default() * step)))),
                    None,
                );
            }
            rt.run_until_idle();
            black_box(p.result())
        })
    });

    c.bench_function("promise_rejection_catch", |b| {
        b.iter(|| {
            let p = Promise::reject(&ctx, "error");
            let caught = p.catch(Some(Handler::new(|v| Ok(Value::string(format!("caught: {v}"))))));
            let _ = caught.catch(None);
            rt.run_until_idle();
            black_box(caught.result())
        })
    });

    c.bench_function("promise_nested_adoption", |b| {
        b.iter(|| {
            let mut p = Promise::resolve(&ctx, "inner");
            for _ in 0..10 {
                p = Promise::resolve(&ctx, p);
            }
            rt.run_until_idle();
            black_box(p.result())
        })
    });

    c.bench_function("promise_many_callbacks", |b| {
        b.iter(|| {
            let (p, resolve, _) = Promise::with_capability(&ctx);
            let children: Vec<Promise> = (0..32).map(|_| p.then(None, None)).collect();
            resolve.resolve(7);
            rt.run_until_idle();
            black_box(children.len())
        })
    });

    let worker = match rt.spawn_worker("bench", false) {
        Ok(worker) => worker,
        Err(e) => panic!("failed to spawn bench worker: {e}"),
    };

    // Main-context promise adopting a worker-context promise
    c.bench_function("promise_cross_context_adoption", |b| {
        b.iter(|| {
            let inner = Promise::resolve(&worker, 5);
            let outer = Promise::resolve(&ctx, inner);
            let probe = outer.clone();
            rt.run_until(Duration::from_secs(5), || probe.result().is_some());
            black_box(outer.result())
        })
    });

    let _ = rt.shutdown();
}

criterion_group!(benches, benchmark_promise_operations);
criterion_main!(benches);
