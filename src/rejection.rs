use crate::context::ContextId;
use crate::value::Value;
use std::fmt;
use std::sync::Mutex;

/// A rejected promise that was dropped without any reject callback ever
/// being attached to it.
#[derive(Debug, Clone)]
pub struct UnhandledRejection {
    pub promise_id: usize,
    pub context: ContextId,
    pub context_name: String,
    pub reason: Value,
    /// Whether the promise's context is privileged.
    pub is_privileged: bool,
}

impl fmt::Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Uncaught (in promise) {} [promise#{} on context '{}'{}]",
            self.reason,
            self.promise_id,
            self.context_name,
            if self.is_privileged { ", privileged" } else { "" }
        )
    }
}

/// Receives unhandled-rejection reports. Always called on the main
/// context's thread, except during runtime teardown.
pub trait ErrorReporter: Send + Sync {
    fn report_unhandled_rejection(&self, report: &UnhandledRejection);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report_unhandled_rejection(&self, report: &UnhandledRejection) {
        log::error!("{report}");
    }
}

/// Keeps every report it receives.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<UnhandledRejection>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<UnhandledRejection> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut *self.reports.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl ErrorReporter for RecordingReporter {
    fn report_unhandled_rejection(&self, report: &UnhandledRejection) {
        log::debug!("RecordingReporter: {report}");
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).push(report.clone());
    }
}
