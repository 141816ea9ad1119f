use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Timing knobs for the log tailer.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Fallback polling interval, used even when filesystem notifications
    /// are available.
    pub poll_interval: Duration,
    /// Window used to collapse bursts of change notifications into one scan.
    pub debounce: Duration,
}

impl TailerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            debounce: Self::DEFAULT_DEBOUNCE,
        }
    }
}

/// Executor configuration.
///
/// Per-job timeouts in a [`crate::JobRequest`] take precedence over the
/// defaults here.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Root directory holding one subdirectory per job.
    pub jobs_dir: PathBuf,
    /// Default absolute time limit for a job.
    pub max_duration: Duration,
    /// Default inactivity limit; `None` disables the idle timer.
    pub idle_timeout: Option<Duration>,
    /// How long to wait for the process to exit on its own after the
    /// terminal event.
    pub grace_period: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    pub tailer: TailerConfig,
    /// Binary path overrides keyed by harness name.
    pub binaries: HashMap<String, String>,
}

impl ExecutorConfig {
    pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

    /// Build a config rooted at `jobs_dir` with default timings.
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            max_duration: Self::DEFAULT_MAX_DURATION,
            idle_timeout: None,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            kill_grace: Self::DEFAULT_KILL_GRACE,
            tailer: TailerConfig::default(),
            binaries: HashMap::new(),
        }
    }
}
