//! Continuations registered on a promise.
//!
//! A [`Callback`] fires on one half of settlement and does one of three
//! things with the settled value:
//!
//! - **PassThrough**: `then` was called without a handler for this half,
//!   the outcome flows unchanged into the derived promise.
//! - **Handler**: a user continuation runs and its outcome settles the
//!   derived promise.
//! - **Adapter**: the promise was fulfilled with a chainable value, the
//!   chainable's outcome is forwarded into the promise that adopted it.
//!   The two adapters of one adoption share a flag, so only the first of
//!   them to fire has any effect.
//!
//! A callback only ever holds the promise it settles, never the promise it
//! is registered on, so ownership stays acyclic.

use crate::promise::Promise;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Fulfill,
    Reject,
}

type HandlerFn = dyn FnOnce(Value) -> Result<Value, Value> + Send;

/// A user continuation. Returning `Err(reason)` is the equivalent of
/// throwing: the derived promise is rejected with `reason`.
pub struct Handler {
    func: Box<HandlerFn>,
}

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        Self { func: Box::new(f) }
    }

    /// Run the continuation. A panic is contained here and becomes an
    /// `InternalError` rejection reason.
    pub(crate) fn call(self, value: Value) -> Result<Value, Value> {
        let func = self.func;
        match panic::catch_unwind(AssertUnwindSafe(move || func(value))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("promise continuation panicked: {message}");
                Err(Value::error("InternalError", message))
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler")
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "continuation panicked".to_string()
    }
}

pub(crate) enum Continuation {
    PassThrough(Promise),
    Handler { handler: Handler, target: Promise },
    Adapter { target: Promise, fired: Arc<AtomicBool> },
}

pub struct Callback {
    disposition: Disposition,
    action: Continuation,
}

impl Callback {
    /// Callback for one half of a `then` registration: wraps `handler` if
    /// one was given, otherwise passes the outcome through to `target`.
    pub(crate) fn for_then(disposition: Disposition, handler: Option<Handler>, target: &Promise) -> Self {
        let action = match handler {
            Some(handler) => Continuation::Handler {
                handler,
                target: target.clone(),
            },
            None => Continuation::PassThrough(target.clone()),
        };
        Self { disposition, action }
    }

    /// Fulfill and reject callbacks forwarding a chainable's outcome into
    /// `target`. Once either has fired, both are inert.
    pub(crate) fn adapter_pair(target: &Promise) -> (Self, Self) {
        let fired = Arc::new(AtomicBool::new(false));
        let make = |disposition| Self {
            disposition,
            action: Continuation::Adapter {
                target: target.clone(),
                fired: fired.clone(),
            },
        };
        (make(Disposition::Fulfill), make(Disposition::Reject))
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// The promise this callback settles.
    pub fn target(&self) -> &Promise {
        match &self.action {
            Continuation::PassThrough(target) | Continuation::Adapter { target, .. } | Continuation::Handler { target, .. } => target,
        }
    }

    pub(crate) fn into_target(self) -> Promise {
        match self.action {
            Continuation::PassThrough(target) | Continuation::Adapter { target, .. } | Continuation::Handler { target, .. } => target,
        }
    }

    /// Fire the continuation with the settled value. May be called from any
    /// thread; settlement of the target is routed to its own context.
    pub fn invoke(self, value: Value) {
        let disposition = self.disposition;
        match self.action {
            Continuation::PassThrough(target) => target.forward(disposition, value),
            Continuation::Adapter { target, fired } => {
                if fired.swap(true, Ordering::SeqCst) {
                    log::debug!("adapter for promise#{} already fired, ignoring {:?}", target.id(), disposition);
                } else {
                    target.forward(disposition, value)
                }
            }
            Continuation::Handler { handler, target } => match (disposition, handler.call(value)) {
                (_, Err(reason)) => target.forward(Disposition::Reject, reason),
                (Disposition::Fulfill, Ok(result)) => target.forward(Disposition::Fulfill, result),
                (Disposition::Reject, Ok(result)) => {
                    if target.context().config().reject_handlers_recover {
                        target.forward(Disposition::Fulfill, result)
                    } else {
                        target.forward(Disposition::Reject, result)
                    }
                }
            },
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.action {
            Continuation::PassThrough(_) => "PassThrough",
            Continuation::Handler { .. } => "Handler",
            Continuation::Adapter { .. } => "Adapter",
        };
        write!(f, "Callback {{ {:?} {} -> promise#{} }}", self.disposition, kind, self.target().id())
    }
}
