//! # Promise state machine
//!
//! A [`Promise`] is created pending, settles at most once and then runs its
//! registered callbacks in registration order.
//!
//! ## Settlement
//!
//! External settlement (`Promise::resolve`, `Promise::reject`, executor
//! capabilities) goes through `settle`, where the first request wins and
//! later ones are ignored. Fulfilling with a chainable value (another
//! promise, or a host [`Thenable`](crate::Thenable)) does not settle yet:
//! adapter callbacks are attached to the chainable and forward its outcome
//! here once it settles. Rejection values are never unwrapped.
//!
//! Every settlement is applied by a queued `Settle` task, including the
//! ones produced by callbacks while another promise drains. Each link of a
//! chain therefore settles in its own task, after the task of the link
//! before it, and the stack depth of a drain does not grow with the chain.
//!
//! ## Threads
//!
//! Each promise is bound to the context it was created on. Calls made from
//! any other thread are turned into tasks for that context, so the state
//! below is only ever mutated by the owning context's thread. The mutex
//! exists to make the handle `Sync` and is uncontended.
//!
//! ## Unhandled rejections
//!
//! When the last handle drops, a promise that ended rejected with an
//! error-like reason and never had a reject callback attached reports
//! itself to the main context.

use crate::callback::{Callback, Disposition, Handler};
use crate::context::{ContextHandle, Task};
use crate::error::PromiseError;
use crate::rejection::UnhandledRejection;
use crate::value::{RetainedValue, Value};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static PROMISE_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PromiseState {
    #[default]
    Pending,
    Fulfilled,
    Rejected,
}

impl From<Disposition> for PromiseState {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Fulfill => PromiseState::Fulfilled,
            Disposition::Reject => PromiseState::Rejected,
        }
    }
}

#[derive(Default)]
struct PromiseSlot {
    state: PromiseState,
    result: Option<RetainedValue>,
    settle_requested: bool,
    drain_task_queued: bool,
    fulfill_callbacks: Vec<Callback>,
    reject_callbacks: Vec<Callback>,
    observed_rejection: bool,
}

struct PromiseInner {
    id: usize,
    context: ContextHandle,
    slot: Mutex<PromiseSlot>,
}

/// Handle to a deferred result. Cloning shares the same promise.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<PromiseInner>,
}

impl Promise {
    /// A pending promise bound to `context`.
    pub fn pending(context: &ContextHandle) -> Promise {
        let id = PROMISE_ID.fetch_add(1, Ordering::SeqCst);
        log::trace!("promise#{} created on context '{}'", id, context.name());
        Promise {
            inner: Arc::new(PromiseInner {
                id,
                context: context.clone(),
                slot: Mutex::new(PromiseSlot::default()),
            }),
        }
    }

    /// A promise settled (asynchronously) by fulfilling with `value`.
    /// A chainable `value` is adopted.
    pub fn resolve(context: &ContextHandle, value: impl Into<Value>) -> Promise {
        let promise = Promise::pending(context);
        promise.settle(Disposition::Fulfill, value.into());
        promise
    }

    /// A promise settled (asynchronously) by rejecting with `value`, which is
    /// kept as-is even when it is chainable.
    pub fn reject(context: &ContextHandle, value: impl Into<Value>) -> Promise {
        let promise = Promise::pending(context);
        promise.settle(Disposition::Reject, value.into());
        promise
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn context(&self) -> &ContextHandle {
        &self.inner.context
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> PromiseState {
        self.slot().state
    }

    /// The settled value, `None` while pending.
    pub fn result(&self) -> Option<Value> {
        self.slot().result.as_ref().map(|r| r.get().clone())
    }

    /// Whether a reject callback has ever been attached.
    pub fn is_rejection_observed(&self) -> bool {
        self.slot().observed_rejection
    }

    /// Register continuations and return the derived promise.
    ///
    /// The derived promise is fulfilled with what `on_fulfilled` returns
    /// (adopting it if chainable) and rejected with its error. A value
    /// returned by `on_rejected` rejects the derived promise unless the
    /// runtime is configured with `reject_handlers_recover`. A missing
    /// handler passes the outcome through unchanged.
    pub fn then(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        let next = Promise::pending(self.context());
        let resolve_cb = Callback::for_then(Disposition::Fulfill, on_fulfilled, &next);
        let reject_cb = Callback::for_then(Disposition::Reject, on_rejected, &next);
        if let Err(err) = self.append_callbacks(Some(resolve_cb), Some(reject_cb)) {
            log::warn!("then: promise#{} could not register callbacks: {}", self.id(), err);
        }
        next
    }

    pub fn catch(&self, on_rejected: Option<Handler>) -> Promise {
        self.then(None, on_rejected)
    }

    /// Append callbacks to the fulfill/reject sequences. If the promise is
    /// already settled a drain task is queued, unless one already is.
    pub fn append_callbacks(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Result<(), PromiseError> {
        if !self.context().is_current() {
            return self.context().enqueue(Task::AttachCallbacks {
                promise: self.clone(),
                on_fulfilled,
                on_rejected,
            });
        }

        let schedule_drain = {
            let mut slot = self.slot();
            if let Some(cb) = on_fulfilled {
                slot.fulfill_callbacks.push(cb);
            }
            if let Some(cb) = on_rejected {
                slot.observed_rejection = true;
                slot.reject_callbacks.push(cb);
            }
            if slot.state != PromiseState::Pending && !slot.drain_task_queued {
                slot.drain_task_queued = true;
                true
            } else {
                false
            }
        };

        if schedule_drain {
            self.context().enqueue(Task::Drain(self.clone()))?;
        }
        Ok(())
    }

    /// External settlement entry point. Only the first request counts.
    pub(crate) fn settle(&self, disposition: Disposition, value: Value) {
        if !self.context().is_current() {
            let task = Task::RequestSettle {
                promise: self.clone(),
                disposition,
                value,
            };
            if let Err(err) = self.context().enqueue(task) {
                log::warn!("settle: promise#{} {:?} request dropped: {}", self.id(), disposition, err);
            }
            return;
        }

        {
            let mut slot = self.slot();
            if slot.settle_requested {
                log::trace!("settle: promise#{} already has a settlement, ignoring {:?}", self.id(), disposition);
                return;
            }
            slot.settle_requested = true;
        }

        match disposition {
            Disposition::Fulfill => self.fulfill_path(value),
            Disposition::Reject => self.reject_path(value),
        }
    }

    /// Settlement coming out of a callback: a chained adoption or the
    /// outcome of a `then` handler. Bypasses the first-wins check; adapter
    /// pairs guard against firing twice themselves.
    pub(crate) fn forward(&self, disposition: Disposition, value: Value) {
        if !self.context().is_current() {
            let task = Task::Forward {
                promise: self.clone(),
                disposition,
                value,
            };
            if let Err(err) = self.context().enqueue(task) {
                log::warn!("forward: promise#{} {:?} dropped: {}", self.id(), disposition, err);
            }
            return;
        }

        self.slot().settle_requested = true;
        match disposition {
            Disposition::Fulfill => self.fulfill_path(value),
            Disposition::Reject => self.reject_path(value),
        }
    }

    fn fulfill_path(&self, value: Value) {
        if let Value::Promise(other) = &value
            && other.ptr_eq(self)
            && self.context().config().detect_self_resolution
        {
            log::debug!("promise#{} resolved with itself", self.id());
            self.reject_path(Value::type_error("Chaining cycle detected for promise"));
            return;
        }

        let attached = match &value {
            Value::Promise(other) => {
                let (on_fulfilled, on_rejected) = Callback::adapter_pair(self);
                Some(other.append_callbacks(Some(on_fulfilled), Some(on_rejected)))
            }
            Value::Thenable(thenable) => {
                let (on_fulfilled, on_rejected) = Callback::adapter_pair(self);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| thenable.append_callbacks(on_fulfilled, on_rejected)));
                Some(outcome.unwrap_or_else(|payload| {
                    Err(crate::chaining_error!(
                        "thenable panicked: {}",
                        crate::callback::panic_message(payload.as_ref())
                    ))
                }))
            }
            _ => None,
        };

        match attached {
            Some(Ok(())) => {
                log::trace!("promise#{} adopting {:?}", self.id(), value);
                return;
            }
            Some(Err(err)) => {
                log::warn!("promise#{} could not chain onto {:?}, fulfilling with it: {}", self.id(), value, err);
            }
            None => {}
        }
        self.apply_settlement(Disposition::Fulfill, value);
    }

    fn reject_path(&self, value: Value) {
        self.apply_settlement(Disposition::Reject, value);
    }

    /// Queue the unwrapped outcome; `settle_now` applies it when the task runs.
    fn apply_settlement(&self, disposition: Disposition, value: Value) {
        let value = RetainedValue::new(self.context().hooks(), value);
        let task = Task::Settle {
            promise: self.clone(),
            disposition,
            value,
        };
        if let Err(err) = self.context().enqueue(task) {
            log::warn!("apply_settlement: promise#{} {:?} dropped: {}", self.id(), disposition, err);
        }
    }

    /// Record the outcome and drain. Runs on the owning context.
    pub(crate) fn settle_now(&self, disposition: Disposition, value: RetainedValue) {
        {
            let mut slot = self.slot();
            if slot.state != PromiseState::Pending {
                log::debug!("promise#{} already {:?}, ignoring {:?}", self.id(), slot.state, disposition);
                return;
            }
            slot.state = disposition.into();
            slot.result = Some(value);
        }
        log::debug!("promise#{} settled {:?}", self.id(), PromiseState::from(disposition));
        self.drain();
    }

    pub(crate) fn run_drain_task(&self) {
        self.slot().drain_task_queued = false;
        self.drain();
    }

    /// Take every callback for the settled half, clear both sequences, then
    /// invoke the taken callbacks in order.
    fn drain(&self) {
        let (callbacks, discarded, result) = {
            let mut slot = self.slot();
            let result = slot.result.as_ref().map(|r| r.get().clone()).unwrap_or_default();
            match slot.state {
                PromiseState::Pending => {
                    log::warn!("drain: promise#{} is still pending", self.id());
                    return;
                }
                PromiseState::Fulfilled => {
                    let discarded = std::mem::take(&mut slot.reject_callbacks);
                    (std::mem::take(&mut slot.fulfill_callbacks), discarded, result)
                }
                PromiseState::Rejected => {
                    let discarded = std::mem::take(&mut slot.fulfill_callbacks);
                    (std::mem::take(&mut slot.reject_callbacks), discarded, result)
                }
            }
        };
        drop(discarded);

        log::trace!("drain: promise#{} running {} callbacks", self.id(), callbacks.len());
        for callback in callbacks {
            callback.invoke(result.clone());
        }
    }

    fn slot(&self) -> MutexGuard<'_, PromiseSlot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PromiseInner {
    /// The deferred unhandled-rejection check, run once when the last
    /// handle goes away.
    fn maybe_report_rejected(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if slot.state != PromiseState::Rejected || slot.observed_rejection {
            return;
        }
        let Some(result) = slot.result.as_ref() else {
            return;
        };
        let reason = result.get();
        if reason.is_undefined() || !self.context.hooks().is_error_like(reason) {
            return;
        }

        let report = UnhandledRejection {
            promise_id: self.id,
            context: self.context.id(),
            context_name: self.context.name().to_string(),
            reason: reason.clone(),
            is_privileged: self.context.is_privileged(),
        };
        self.context.report_unhandled(report);
    }

    fn take_callback_targets(&mut self, targets: &mut Vec<Promise>) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        let fulfill = std::mem::take(&mut slot.fulfill_callbacks);
        let reject = std::mem::take(&mut slot.reject_callbacks);
        targets.extend(fulfill.into_iter().chain(reject).map(Callback::into_target));
    }
}

impl Drop for PromiseInner {
    fn drop(&mut self) {
        self.maybe_report_rejected();

        // Tear down pending derived promises one at a time instead of
        // recursing through each link's callbacks.
        let mut targets = Vec::new();
        self.take_callback_targets(&mut targets);
        while let Some(target) = targets.pop() {
            if let Some(mut inner) = Arc::into_inner(target.inner) {
                inner.take_callback_targets(&mut targets);
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.slot.try_lock() {
            Ok(slot) => write!(f, "Promise#{}({:?})", self.inner.id, slot.state),
            Err(_) => write!(f, "Promise#{}(<busy>)", self.inner.id),
        }
    }
}
