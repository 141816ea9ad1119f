//! The caller-facing outcome surface.

use serde_json::Value;

/// Receives the result of every job exactly once.
///
/// Live jobs and jobs recovered by orphan reconciliation report through the
/// same methods. Every terminal method receives whatever text the harness
/// produced, even on failure or timeout.
pub trait JobCallbacks: Send + Sync {
    fn on_complete(
        &self,
        job_id: &str,
        result: &str,
        session_id: Option<&str>,
        exit_was_forced: bool,
    );

    fn on_fail(&self, job_id: &str, reason: &str, partial: Option<&str>, exit_was_forced: bool);

    fn on_timeout(&self, job_id: &str, partial: Option<&str>);

    /// Fired for every structured event of a live job, regardless of
    /// outcome.
    fn on_event(&self, _job_id: &str, _event: &Value) {}
}

/// Final outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete {
        result: String,
        session_id: Option<String>,
        /// The process had to be killed after its terminal event.
        exit_was_forced: bool,
    },
    Failed {
        reason: String,
        partial: Option<String>,
        exit_was_forced: bool,
    },
    TimedOut {
        partial: Option<String>,
    },
}

impl JobOutcome {
    pub(crate) fn failed(reason: impl Into<String>, partial: String, exit_was_forced: bool) -> Self {
        JobOutcome::Failed {
            reason: reason.into(),
            partial: non_empty(partial),
            exit_was_forced,
        }
    }

    pub(crate) fn timed_out(partial: String) -> Self {
        JobOutcome::TimedOut {
            partial: non_empty(partial),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobOutcome::Complete { .. })
    }

    /// The result text for completions, the partial text otherwise.
    pub fn text(&self) -> Option<&str> {
        match self {
            JobOutcome::Complete { result, .. } => Some(result),
            JobOutcome::Failed { partial, .. } | JobOutcome::TimedOut { partial } => {
                partial.as_deref()
            }
        }
    }

    /// Invoke the matching callback.
    pub fn dispatch(&self, job_id: &str, callbacks: &dyn JobCallbacks) {
        match self {
            JobOutcome::Complete {
                result,
                session_id,
                exit_was_forced,
            } => callbacks.on_complete(job_id, result, session_id.as_deref(), *exit_was_forced),
            JobOutcome::Failed {
                reason,
                partial,
                exit_was_forced,
            } => callbacks.on_fail(job_id, reason, partial.as_deref(), *exit_was_forced),
            JobOutcome::TimedOut { partial } => callbacks.on_timeout(job_id, partial.as_deref()),
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}
