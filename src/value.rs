use crate::callback::Callback;
use crate::error::PromiseError;
use crate::promise::Promise;
use std::fmt;
use std::sync::Arc;

/// Opaque host value flowing through the engine.
///
/// The engine only needs to tell chainable results (`Promise`, `Thenable`)
/// apart from everything else, and to ask the host whether a rejection
/// reason looks like an error. All variants are cheap to clone.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Error(Arc<ErrorValue>),
    Promise(Promise),
    Thenable(Arc<dyn Thenable>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// A foreign value exposing the same "register continuation" capability as
/// a [`Promise`]. Fulfilling a promise with a thenable adopts its outcome.
///
/// Implementations should eventually invoke one of the two callbacks, from
/// any thread. Only the first invocation of either counts; the pair ignores
/// anything after it. Returning an error makes the engine treat the thenable
/// as a plain value.
pub trait Thenable: Send + Sync {
    fn append_callbacks(&self, on_fulfilled: Callback, on_rejected: Callback) -> Result<(), PromiseError>;

    fn describe(&self) -> String {
        "[object Thenable]".to_string()
    }
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Value::Error(Arc::new(ErrorValue {
            name: name.into(),
            message: message.into(),
        }))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::error("TypeError", message)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for values that expose the chaining capability.
    pub fn is_chainable(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Thenable(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        // -0 prints as 0
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Error(e) => write!(f, "{e}"),
            Value::Promise(_) => write!(f, "[object Promise]"),
            Value::Thenable(t) => write!(f, "{}", t.describe()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({})", format_number(*n)),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Error(e) => write!(f, "Error({e})"),
            Value::Promise(p) => write!(f, "{p:?}"),
            Value::Thenable(t) => write!(f, "Thenable({})", t.describe()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(Arc::new(e))
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

/// Host hooks that keep result values reachable and classify rejection
/// reasons. `retain`/`release` calls are always balanced.
pub trait ValueHooks: Send + Sync {
    fn retain(&self, _value: &Value) {}

    fn release(&self, _value: &Value) {}

    /// Whether an unobserved rejection with this reason should be reported.
    fn is_error_like(&self, value: &Value) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValueHooks;

impl ValueHooks for DefaultValueHooks {
    fn is_error_like(&self, value: &Value) -> bool {
        matches!(value, Value::Error(_))
    }
}

/// A value held reachable through [`ValueHooks`] for as long as this guard
/// lives.
pub struct RetainedValue {
    value: Value,
    hooks: Arc<dyn ValueHooks>,
}

impl RetainedValue {
    pub fn new(hooks: Arc<dyn ValueHooks>, value: Value) -> Self {
        hooks.retain(&value);
        Self { value, hooks }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }
}

impl Drop for RetainedValue {
    fn drop(&mut self) {
        self.hooks.release(&self.value);
    }
}

impl fmt::Debug for RetainedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RetainedValue({:?})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicIsize, Ordering};

    #[test]
    fn test_number_display_matches_js() {
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from(-0.0).to_string(), "0");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from(f64::NEG_INFINITY).to_string(), "-Infinity");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Value::type_error("boom").to_string(), "TypeError: boom");
        assert_eq!(Value::error("AbortError", "").to_string(), "AbortError");
    }

    #[test]
    fn test_default_hooks_classify_errors_only() {
        let hooks = DefaultValueHooks;
        assert!(hooks.is_error_like(&Value::type_error("x")));
        assert!(!hooks.is_error_like(&Value::from("x")));
        assert!(!hooks.is_error_like(&Value::Undefined));
    }

    struct Counting(AtomicIsize);

    impl ValueHooks for Counting {
        fn retain(&self, _value: &Value) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self, _value: &Value) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
        fn is_error_like(&self, _value: &Value) -> bool {
            false
        }
    }

    #[test]
    fn test_retained_value_releases_on_drop() {
        let hooks = Arc::new(Counting(AtomicIsize::new(0)));
        let retained = RetainedValue::new(hooks.clone(), Value::from(1));
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
        assert_eq!(retained.get(), &Value::from(1));
        drop(retained);
        assert_eq!(hooks.0.load(Ordering::SeqCst), 0);
    }
}
