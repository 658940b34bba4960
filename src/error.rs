#[derive(thiserror::Error, Debug)]
pub enum PromiseError {
    #[error("context '{context}' is no longer accepting tasks")]
    ContextClosed { context: String },

    #[error("chaining attachment failed: {message}")]
    ChainingFailed { message: String },

    #[error("invalid value '{value}' for configuration key {key}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("failed to spawn worker '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker '{name}' panicked")]
    WorkerPanicked { name: String },

    #[error("std::io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PromiseError> for std::io::Error {
    fn from(err: PromiseError) -> std::io::Error {
        match err {
            PromiseError::Io(io_err) => io_err,
            _ => std::io::Error::other(err.to_string()),
        }
    }
}

// Builds a `ChainingFailed` error from a format string, so thenable
// implementations can refuse attachment with a readable message.
#[macro_export]
macro_rules! chaining_error {
    ($($arg:tt)*) => {
        $crate::PromiseError::ChainingFailed {
            message: format!($($arg)*),
        }
    };
}
