//! A deferred-result engine: promises bound to execution contexts, settled
//! at most once, with continuation chaining across contexts and reporting of
//! rejections nobody ever handled.

pub(crate) mod callback;
pub(crate) mod capability;
pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod promise;
pub(crate) mod rejection;
pub(crate) mod runtime;
pub(crate) mod value;

pub use callback::{Callback, Disposition, Handler};
pub use capability::{RejectHandle, ResolveHandle};
pub use config::EngineConfig;
pub use context::{ContextHandle, ContextId, ContextKind, EventLoop, PollResult};
pub use error::PromiseError;
pub use promise::{Promise, PromiseState};
pub use rejection::{ErrorReporter, LogReporter, RecordingReporter, UnhandledRejection};
pub use runtime::{Runtime, RuntimeBuilder};
pub use value::{DefaultValueHooks, ErrorValue, RetainedValue, Thenable, ValueHooks, Value};
