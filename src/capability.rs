//! Executor-style construction: resolve/reject capabilities handed to a
//! closure that runs synchronously.

use crate::callback::{Disposition, panic_message};
use crate::context::ContextHandle;
use crate::promise::Promise;
use crate::value::Value;
use std::panic::{self, AssertUnwindSafe};

/// Fulfills its promise. Only the first settlement through either
/// capability takes effect.
#[derive(Debug, Clone)]
pub struct ResolveHandle {
    promise: Promise,
}

impl ResolveHandle {
    pub fn resolve(&self, value: impl Into<Value>) {
        self.promise.settle(Disposition::Fulfill, value.into());
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}

#[derive(Debug, Clone)]
pub struct RejectHandle {
    promise: Promise,
}

impl RejectHandle {
    pub fn reject(&self, value: impl Into<Value>) {
        self.promise.settle(Disposition::Reject, value.into());
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}

impl Promise {
    /// A pending promise together with its settlement capabilities. The
    /// capabilities can be sent to any thread.
    pub fn with_capability(context: &ContextHandle) -> (Promise, ResolveHandle, RejectHandle) {
        let promise = Promise::pending(context);
        let resolve = ResolveHandle { promise: promise.clone() };
        let reject = RejectHandle { promise: promise.clone() };
        (promise, resolve, reject)
    }

    /// Run `executor` right away with the new promise's capabilities.
    ///
    /// An `Err` returned by the executor rejects the promise with that
    /// reason, as does a panic (with an `InternalError`). Either is a no-op if
    /// the executor already settled it.
    pub fn new<F>(context: &ContextHandle, executor: F) -> Promise
    where
        F: FnOnce(ResolveHandle, RejectHandle) -> Result<(), Value>,
    {
        let (promise, resolve, reject) = Promise::with_capability(context);
        let failure = reject.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || executor(resolve, reject))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                log::debug!("executor for promise#{} failed: {:?}", promise.id(), reason);
                failure.reject(reason);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("executor for promise#{} panicked: {}", promise.id(), message);
                failure.reject(Value::error("InternalError", message));
            }
        }
        promise
    }
}
