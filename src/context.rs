//! Execution contexts and their task queues.
//!
//! Every context (the main context or a worker) owns one FIFO channel of
//! [`Task`]s and a single thread that drains it through an [`EventLoop`].
//! A promise is bound to one context for its whole life; whatever thread
//! touches it, the state change itself runs as a task on that context.

use crate::callback::{Callback, Disposition};
use crate::config::EngineConfig;
use crate::error::PromiseError;
use crate::promise::Promise;
use crate::rejection::{ErrorReporter, UnhandledRejection};
use crate::runtime::HostShared;
use crate::value::{RetainedValue, Value, ValueHooks};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Monotonic task id, used to correlate enqueue and execution logs.
static TASK_COUNTER: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u32);

impl ContextId {
    pub const MAIN: ContextId = ContextId(0);

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Main,
    Worker,
}

pub(crate) enum Task {
    /// Apply an already-unwrapped settlement, then drain.
    Settle {
        promise: Promise,
        disposition: Disposition,
        value: RetainedValue,
    },
    /// The promise is settled; run whatever callbacks are queued.
    Drain(Promise),
    /// External settlement request made off the owning context.
    RequestSettle {
        promise: Promise,
        disposition: Disposition,
        value: Value,
    },
    /// Chained settlement produced off the owning context.
    Forward {
        promise: Promise,
        disposition: Disposition,
        value: Value,
    },
    /// Callback registration made off the owning context.
    AttachCallbacks {
        promise: Promise,
        on_fulfilled: Option<Callback>,
        on_rejected: Option<Callback>,
    },
    ReportUnhandled(UnhandledRejection),
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

impl Task {
    fn summary(&self) -> String {
        match self {
            Task::Settle { promise, disposition, .. } => format!("Settle promise#{} {:?}", promise.id(), disposition),
            Task::Drain(promise) => format!("Drain promise#{}", promise.id()),
            Task::RequestSettle { promise, disposition, .. } => format!("RequestSettle promise#{} {:?}", promise.id(), disposition),
            Task::Forward { promise, disposition, .. } => format!("Forward promise#{} {:?}", promise.id(), disposition),
            Task::AttachCallbacks {
                promise,
                on_fulfilled,
                on_rejected,
            } => format!(
                "AttachCallbacks promise#{} fulfill={} reject={}",
                promise.id(),
                on_fulfilled.is_some(),
                on_rejected.is_some()
            ),
            Task::ReportUnhandled(report) => format!("ReportUnhandled promise#{}", report.promise_id),
            Task::Run(_) => "Run".to_string(),
            Task::Shutdown => "Shutdown".to_string(),
        }
    }
}

pub(crate) struct ContextShared {
    id: ContextId,
    name: String,
    kind: ContextKind,
    privileged: bool,
    sender: Sender<(usize, Task)>,
    thread: OnceLock<ThreadId>,
    host: Arc<HostShared>,
}

/// Handle to an execution context. Cheap to clone and usable from any
/// thread; enqueueing never blocks.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<ContextShared>,
}

impl ContextHandle {
    pub(crate) fn new(
        id: ContextId,
        name: String,
        kind: ContextKind,
        privileged: bool,
        sender: Sender<(usize, Task)>,
        host: Arc<HostShared>,
    ) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                id,
                name,
                kind,
                privileged,
                sender,
                thread: OnceLock::new(),
                host,
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> ContextKind {
        self.shared.kind
    }

    pub fn is_main(&self) -> bool {
        self.shared.kind == ContextKind::Main
    }

    pub fn is_privileged(&self) -> bool {
        self.shared.privileged
    }

    /// True when called from the thread this context's loop runs on.
    pub fn is_current(&self) -> bool {
        self.shared.thread.get().is_some_and(|id| *id == thread::current().id())
    }

    /// Whether promises should be exposed to script running on this
    /// context: the preference is on, or the context is privileged.
    pub fn promises_enabled(&self) -> bool {
        self.config().promises_enabled || self.is_privileged()
    }

    pub fn queued_tasks(&self) -> usize {
        self.shared.sender.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.host.config
    }

    pub(crate) fn hooks(&self) -> Arc<dyn ValueHooks> {
        self.shared.host.hooks.clone()
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.shared.host.reporter
    }

    pub fn ptr_eq(&self, other: &ContextHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run `work` later on this context's thread, after everything already
    /// queued there.
    pub fn dispatch<F>(&self, work: F) -> Result<(), PromiseError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::Run(Box::new(work)))
    }

    pub(crate) fn bind_current_thread(&self) {
        let current = thread::current().id();
        if let Err(existing) = self.shared.thread.set(current)
            && existing != current
        {
            log::warn!("context '{}' is already bound to {:?}", self.shared.name, existing);
        }
    }

    pub(crate) fn enqueue(&self, task: Task) -> Result<(), PromiseError> {
        let task_id = TASK_COUNTER.fetch_add(1, Ordering::SeqCst);
        log::debug!("queue_task: context={} id={} {}", self.shared.name, task_id, task.summary());
        self.shared.sender.send((task_id, task)).map_err(|_| PromiseError::ContextClosed {
            context: self.shared.name.clone(),
        })
    }

    /// Hand an unhandled-rejection report to the main context. When the main
    /// context is gone the reporter is called right here instead.
    pub(crate) fn report_unhandled(&self, report: UnhandledRejection) {
        let host = &self.shared.host;
        let task_id = TASK_COUNTER.fetch_add(1, Ordering::SeqCst);
        log::debug!("queue_task: context=main id={} ReportUnhandled promise#{}", task_id, report.promise_id);
        if let Err(crossbeam_channel::SendError((_, task))) = host.main.send((task_id, Task::ReportUnhandled(report)))
            && let Task::ReportUnhandled(report) = task
        {
            log::debug!("main context closed, reporting promise#{} synchronously", report.promise_id);
            host.reporter.report_unhandled_rejection(&report);
        }
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .field("privileged", &self.shared.privileged)
            .finish()
    }
}

/// Result of polling an event loop once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// A task was executed.
    Executed,
    /// The queue is empty.
    Empty,
    /// A shutdown request was dequeued, or every sender is gone.
    Shutdown,
}

/// The single consumer of one context's task queue.
pub struct EventLoop {
    context: ContextHandle,
    receiver: Receiver<(usize, Task)>,
    processed: u64,
}

impl EventLoop {
    pub(crate) fn new(context: ContextHandle, receiver: Receiver<(usize, Task)>) -> Self {
        Self {
            context,
            receiver,
            processed: 0,
        }
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn tasks_processed(&self) -> u64 {
        self.processed
    }

    pub(crate) fn bind_current_thread(&self) {
        self.context.bind_current_thread();
    }

    /// Execute at most one queued task without blocking.
    pub fn poll(&mut self) -> PollResult {
        match self.receiver.try_recv() {
            Ok((task_id, task)) => self.execute(task_id, task),
            Err(TryRecvError::Empty) => PollResult::Empty,
            Err(TryRecvError::Disconnected) => PollResult::Shutdown,
        }
    }

    /// Execute tasks until the queue is empty, including tasks queued by the
    /// tasks themselves. Returns how many ran.
    pub fn run_until_idle(&mut self) -> usize {
        let mut executed = 0;
        loop {
            match self.poll() {
                PollResult::Executed => executed += 1,
                PollResult::Empty | PollResult::Shutdown => break,
            }
        }
        log::trace!("run_until_idle: context={} executed={}", self.context.name(), executed);
        executed
    }

    /// Execute tasks, blocking for new ones, until `done()` holds or
    /// `timeout` elapses. Returns the final value of `done()`.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok((task_id, task)) => {
                    if self.execute(task_id, task) == PollResult::Shutdown {
                        return done();
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// Block and execute tasks until a shutdown request arrives, then run
    /// whatever was queued before it. Returns how many tasks ran.
    pub fn run(&mut self) -> usize {
        let mut executed = 0;
        while let Ok((task_id, task)) = self.receiver.recv() {
            match self.execute(task_id, task) {
                PollResult::Shutdown => break,
                _ => executed += 1,
            }
        }
        while let Ok((task_id, task)) = self.receiver.try_recv() {
            if self.execute(task_id, task) == PollResult::Executed {
                executed += 1;
            }
        }
        log::debug!("event loop for context '{}' stopped after {} tasks", self.context.name(), executed);
        executed
    }

    fn execute(&mut self, task_id: usize, task: Task) -> PollResult {
        log::trace!("process_task: context={} id={} {}", self.context.name(), task_id, task.summary());
        match task {
            Task::Settle {
                promise,
                disposition,
                value,
            } => promise.settle_now(disposition, value),
            Task::Drain(promise) => promise.run_drain_task(),
            Task::RequestSettle {
                promise,
                disposition,
                value,
            } => promise.settle(disposition, value),
            Task::Forward {
                promise,
                disposition,
                value,
            } => promise.forward(disposition, value),
            Task::AttachCallbacks {
                promise,
                on_fulfilled,
                on_rejected,
            } => {
                if let Err(err) = promise.append_callbacks(on_fulfilled, on_rejected) {
                    log::warn!("process_task: id={} dropping callbacks for promise#{}: {}", task_id, promise.id(), err);
                }
            }
            Task::ReportUnhandled(report) => self.context.reporter().report_unhandled_rejection(&report),
            Task::Run(work) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    let message = crate::callback::panic_message(payload.as_ref());
                    log::error!("process_task: id={} dispatched work panicked: {}", task_id, message);
                }
            }
            Task::Shutdown => return PollResult::Shutdown,
        }
        self.processed += 1;
        PollResult::Executed
    }
}
