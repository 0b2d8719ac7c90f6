//! Reporting surface between the pipeline and its host shell.
//!
//! The pipeline never talks to a terminal or a window directly. Every
//! user-visible line goes through [`SyncReporter`], which a GUI, a CLI, or a
//! test harness implements. [`TracingReporter`] forwards to `tracing` and is
//! the default; [`NullReporter`] swallows everything and answers every
//! confirmation with yes, which is what unattended runs and tests want.

/// Progress and messaging sink for one sync run.
///
/// Implementations must be callable from worker threads: the crate fixer and
/// session fixer report progress from inside the parallel stages.
pub trait SyncReporter: Send + Sync {
    /// An informational line.
    fn info(&self, message: &str);

    /// A non-fatal error line.
    fn error(&self, message: &str);

    /// Progress within a named task.
    fn progress(&self, task: &str, current: usize, total: usize) {
        let _ = (task, current, total);
    }

    /// A named task finished.
    fn progress_complete(&self, task: &str) {
        let _ = task;
    }

    /// Ask the user a yes/no question. Non-interactive implementations
    /// should answer `true` so unattended syncs can proceed.
    fn confirm(&self, prompt: &str) -> bool {
        let _ = prompt;
        true
    }
}

/// Reporter that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!(target: "seratosync", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "seratosync", "{message}");
    }

    fn progress(&self, task: &str, current: usize, total: usize) {
        tracing::debug!(target: "seratosync", task, current, total, "progress");
    }

    fn progress_complete(&self, task: &str) {
        tracing::debug!(target: "seratosync", task, "progress complete");
    }
}

/// Reporter that discards all output. Used by tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl SyncReporter for NullReporter {
    fn info(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}
