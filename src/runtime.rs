//! Runtime: the main context plus any number of worker contexts.
//!
//! The main context is bound to the thread that builds the runtime and is
//! driven explicitly through [`Runtime::run_until_idle`] or
//! [`Runtime::run_until`]. Each worker gets its own named thread running an
//! [`EventLoop`] until the runtime shuts it down.

use crate::config::EngineConfig;
use crate::context::{ContextHandle, ContextId, ContextKind, EventLoop, Task};
use crate::error::PromiseError;
use crate::rejection::{ErrorReporter, LogReporter};
use crate::value::{DefaultValueHooks, ValueHooks};
use crossbeam_channel::{Sender, unbounded};
use indexmap::IndexMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared by every context of one runtime.
pub(crate) struct HostShared {
    pub(crate) config: EngineConfig,
    pub(crate) hooks: Arc<dyn ValueHooks>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    /// Sender of the main context, where unhandled rejections are reported.
    pub(crate) main: Sender<(usize, Task)>,
}

pub struct RuntimeBuilder {
    config: EngineConfig,
    hooks: Arc<dyn ValueHooks>,
    reporter: Arc<dyn ErrorReporter>,
    main_name: String,
    main_privileged: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            hooks: Arc::new(DefaultValueHooks),
            reporter: Arc::new(LogReporter),
            main_name: "main".to_string(),
            main_privileged: false,
        }
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn value_hooks(mut self, hooks: Arc<dyn ValueHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn main_name(mut self, name: impl Into<String>) -> Self {
        self.main_name = name.into();
        self
    }

    pub fn main_privileged(mut self, privileged: bool) -> Self {
        self.main_privileged = privileged;
        self
    }

    /// Build the runtime and bind its main context to the calling thread.
    pub fn build(self) -> Runtime {
        let (sender, receiver) = unbounded();
        let host = Arc::new(HostShared {
            config: self.config,
            hooks: self.hooks,
            reporter: self.reporter,
            main: sender.clone(),
        });
        let main = ContextHandle::new(ContextId::MAIN, self.main_name, ContextKind::Main, self.main_privileged, sender, host.clone());
        let main_loop = EventLoop::new(main, receiver);
        main_loop.bind_current_thread();
        log::debug!("runtime built, main context '{}' bound to {:?}", main_loop.context().name(), thread::current().id());
        Runtime {
            host,
            main_loop,
            workers: IndexMap::new(),
            next_context_id: 1,
            _not_send: PhantomData,
        }
    }
}

struct Worker {
    context: ContextHandle,
    join: Option<JoinHandle<()>>,
}

/// Owns the main context's event loop and the worker threads.
///
/// Not `Send`: the main context stays on the thread that built it.
pub struct Runtime {
    host: Arc<HostShared>,
    main_loop: EventLoop,
    workers: IndexMap<ContextId, Worker>,
    next_context_id: u32,
    _not_send: PhantomData<*const ()>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Build a runtime configured from `PROMISE_ENGINE_*` variables.
    pub fn from_env() -> Result<Self, PromiseError> {
        Ok(RuntimeBuilder::new().config(EngineConfig::from_env()?).build())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.host.config
    }

    pub fn main(&self) -> ContextHandle {
        self.main_loop.context().clone()
    }

    pub fn main_loop(&mut self) -> &mut EventLoop {
        &mut self.main_loop
    }

    /// Start a worker context on its own thread.
    pub fn spawn_worker(&mut self, name: &str, privileged: bool) -> Result<ContextHandle, PromiseError> {
        let id = ContextId(self.next_context_id);
        self.next_context_id += 1;
        let (sender, receiver) = unbounded();
        let context = ContextHandle::new(id, name.to_string(), ContextKind::Worker, privileged, sender, self.host.clone());
        let mut event_loop = EventLoop::new(context.clone(), receiver);

        let join = thread::Builder::new()
            .name(format!("promise-worker-{name}"))
            .spawn(move || {
                event_loop.bind_current_thread();
                log::debug!("worker '{}' started", event_loop.context().name());
                event_loop.run();
            })
            .map_err(|source| PromiseError::WorkerSpawn {
                name: name.to_string(),
                source,
            })?;

        log::debug!("spawned worker '{}' as {}", name, id);
        self.workers.insert(
            id,
            Worker {
                context: context.clone(),
                join: Some(join),
            },
        );
        Ok(context)
    }

    pub fn worker(&self, id: ContextId) -> Option<ContextHandle> {
        self.workers.get(&id).map(|w| w.context.clone())
    }

    pub fn workers(&self) -> impl Iterator<Item = &ContextHandle> {
        self.workers.values().map(|w| &w.context)
    }

    /// Run main-context tasks until its queue is empty.
    pub fn run_until_idle(&mut self) -> usize {
        self.main_loop.run_until_idle()
    }

    /// Run main-context tasks, waiting for work posted by workers, until
    /// `done()` holds or `timeout` elapses.
    pub fn run_until<F>(&mut self, timeout: Duration, done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        self.main_loop.run_until(timeout, done)
    }

    /// Ask one worker to stop after its already-queued tasks, and wait for it.
    pub fn shutdown_worker(&mut self, id: ContextId) -> Result<(), PromiseError> {
        match self.workers.shift_remove(&id) {
            Some(worker) => stop_worker(worker),
            None => Ok(()),
        }
    }

    /// Stop every worker, in spawn order, then flush the main queue so
    /// reports posted by the workers are delivered.
    pub fn shutdown(&mut self) -> Result<(), PromiseError> {
        let mut first_error = None;
        for (_, worker) in self.workers.drain(..) {
            if let Err(err) = stop_worker(worker) {
                log::warn!("shutdown: {err}");
                first_error.get_or_insert(err);
            }
        }
        self.main_loop.run_until_idle();
        first_error.map_or(Ok(()), Err)
    }
}

fn stop_worker(mut worker: Worker) -> Result<(), PromiseError> {
    let name = worker.context.name().to_string();
    if let Err(err) = worker.context.enqueue(Task::Shutdown) {
        log::debug!("worker '{name}' already stopped: {err}");
    }
    match worker.join.take() {
        Some(join) => join.join().map_err(|_| PromiseError::WorkerPanicked { name }),
        None => Ok(()),
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for (_, worker) in self.workers.drain(..) {
            if let Err(err) = stop_worker(worker) {
                log::warn!("runtime drop: {err}");
            }
        }
    }
}
