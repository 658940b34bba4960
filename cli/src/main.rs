use promise_engine::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(clap::Parser)]
#[command(name = "promise-cli", version, about = "Drive a promise chain across worker contexts")]
struct Cli {
    /// Number of `then` links in the chain
    #[arg(short, long, default_value_t = 8)]
    depth: usize,

    /// Number of worker contexts the chain hops across
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Reject the root promise instead of fulfilling it
    #[arg(short, long)]
    reject: bool,

    /// Let `onReject` handlers recover (fulfill the derived promise)
    #[arg(long)]
    recover: bool,

    /// Seconds to wait for the chain to settle
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Root value
    #[arg(default_value_t = 1.0)]
    value: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    // Initialize logger (controlled by RUST_LOG)
    env_logger::init();

    let cli = <Cli as clap::Parser>::parse();

    let mut config = EngineConfig::from_env()?;
    if cli.recover {
        config.reject_handlers_recover = true;
    }
    let reporter = Arc::new(RecordingReporter::new());
    let mut rt = Runtime::builder().config(config).reporter(reporter.clone()).build();

    let mut contexts = vec![rt.main()];
    for i in 0..cli.workers {
        contexts.push(rt.spawn_worker(&format!("w{i}"), false)?);
    }

    let root = if cli.reject {
        Promise::reject(&contexts[0], Value::error("Error", format!("root rejected with {}", cli.value)))
    } else {
        Promise::resolve(&contexts[0], cli.value)
    };

    // Each link doubles the value on the next context in turn.
    let mut tail = root;
    for link in 0..cli.depth {
        let ctx = contexts[(link + 1) % contexts.len()].clone();
        let hop = Handler::new(move |v| {
            let n = v.as_number().unwrap_or_default();
            log::debug!("link {} on '{}' got {}", link, ctx.name(), v);
            Ok(Promise::resolve(&ctx, n * 2.0).into())
        });
        let on_reject = Handler::new(move |reason| {
            log::debug!("link {link} saw rejection: {reason}");
            Ok(reason)
        });
        tail = tail.then(Some(hop), Some(on_reject));
    }

    // The tail stays on main; adopt it there so waiting is a main-loop wait.
    let last = Promise::resolve(&rt.main(), tail);
    let probe = last.clone();
    let settled = rt.run_until(Duration::from_secs(cli.timeout), || probe.state() != PromiseState::Pending);

    println!("state:  {:?}", last.state());
    match last.result() {
        Some(result) => println!("result: {result}"),
        None => println!("result: <pending>"),
    }

    drop(last);
    drop(probe);
    rt.shutdown()?;
    for report in reporter.take() {
        println!("report: {report}");
    }

    if !settled {
        eprintln!("chain did not settle within {}s", cli.timeout);
        std::process::exit(1);
    }
    Ok(())
}
