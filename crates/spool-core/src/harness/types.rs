//! Request and invocation types shared by all harness adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the executor needs to run one job.
///
/// The prompt is already fully rendered; template assembly happens before a
/// request reaches this crate.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    /// Unique job identifier; also the name of the job directory.
    pub job_id: String,
    /// Harness name (`claude`, `codex`, `gemini`). Unknown names fall back
    /// to the registry default.
    pub harness: String,
    /// The prompt passed to the agent.
    pub prompt: String,
    /// Optional model override forwarded as `--model`.
    pub model: Option<String>,
    /// Session to resume, for harnesses that support it.
    pub resume_session_id: Option<String>,
    /// Working directory for the agent process. Inherits the coordinator's
    /// when `None`.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables merged over the coordinator's own.
    pub env_vars: HashMap<String, String>,
    /// Per-job idle timeout; falls back to the executor default.
    pub idle_timeout: Option<Duration>,
    /// Per-job max-duration timeout; falls back to the executor default.
    pub max_duration: Option<Duration>,
}

impl JobRequest {
    /// Create a request with only the required fields set.
    pub fn new(
        job_id: impl Into<String>,
        harness: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            harness: harness.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// A fully-resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments, not including the program itself.
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` when `value` is present.
    pub fn opt(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.arg(flag).arg(v),
            None => self,
        }
    }
}
