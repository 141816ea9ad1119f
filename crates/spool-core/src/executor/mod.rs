//! Job executor: spawns agent processes, supervises them, and reports each
//! job's outcome exactly once.
//!
//! # Architecture
//!
//! ```text
//!   Executor::start(JobRequest)
//!       |
//!       v
//!   Harness::command ──> spawn (stdout >> output.jsonl)
//!       |
//!       v
//!   LogTailer ──events──> JobRun task ──> StreamHandler
//!                              |   \
//!                              |    └──> JobTracker (status.json)
//!                              v
//!                        JobCallbacks (exactly once)
//! ```
//!
//! Because agent output goes to a file rather than a pipe, a coordinator
//! crash leaves both the log and the status record behind.
//! [`Executor::reconcile_orphans`] picks those jobs up on the next start.

mod callbacks;
mod job;
pub mod process;
mod reconcile;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use callbacks::{JobCallbacks, JobOutcome};
pub use reconcile::{ReconcileReport, ReconciledJob, replay_log};

use crate::config::ExecutorConfig;
use crate::harness::{HarnessRegistry, JobRequest};
use crate::tailer::LogTailer;
use crate::tracker::{JobPaths, JobTracker, StatusRecord, TrackerError, load_record};
use job::{JobLimits, JobRun};

/// Errors returned by the executor API. Job failures are not errors; they
/// are reported through [`JobCallbacks`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error("no harness available for '{0}'")]
    NoHarness(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Registry entry for a job whose task is still running.
struct ActiveJob {
    serial: u64,
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveJob>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove `job_id` only if the entry still belongs to the same start.
fn remove_active(active: &ActiveMap, job_id: &str, serial: u64) {
    let mut map = lock(active);
    if map.get(job_id).is_some_and(|job| job.serial == serial) {
        map.remove(job_id);
    }
}

/// Runs and supervises agent jobs.
///
/// Must be used from within a tokio runtime.
pub struct Executor {
    config: ExecutorConfig,
    harnesses: HarnessRegistry,
    active: ActiveMap,
    next_serial: AtomicU64,
}

impl Executor {
    pub fn new(config: ExecutorConfig, harnesses: HarnessRegistry) -> Self {
        Self {
            config,
            harnesses,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Build an executor with the built-in harnesses, honoring the binary
    /// overrides in `config`.
    pub fn from_config(config: ExecutorConfig) -> Self {
        let harnesses = HarnessRegistry::with_binaries(&config.binaries);
        Self::new(config, harnesses)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn harnesses(&self) -> &HarnessRegistry {
        &self.harnesses
    }

    /// Start a job.
    ///
    /// A spawn failure is not an error here: the job is finalized as failed
    /// and `callbacks` hear about it like any other failure. The returned
    /// handle's [`wait`](ExecutionHandle::wait) resolves immediately in that
    /// case.
    pub fn start(
        &self,
        request: JobRequest,
        callbacks: Arc<dyn JobCallbacks>,
    ) -> Result<ExecutionHandle, ExecutorError> {
        let job_id = request.job_id.clone();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        {
            let mut active = lock(&self.active);
            if active.contains_key(&job_id) {
                return Err(ExecutorError::AlreadyRunning(job_id));
            }
            active.insert(
                job_id.clone(),
                ActiveJob {
                    serial,
                    pid: None,
                    kill_tx: kill_tx.clone(),
                    cancel: cancel.clone(),
                    task: None,
                },
            );
        }

        let launched = self.launch(request, callbacks, serial, kill_tx, kill_rx, cancel);
        if launched.is_err() {
            remove_active(&self.active, &job_id, serial);
        }
        launched
    }

    fn launch(
        &self,
        request: JobRequest,
        callbacks: Arc<dyn JobCallbacks>,
        serial: u64,
        kill_tx: mpsc::UnboundedSender<()>,
        kill_rx: mpsc::UnboundedReceiver<()>,
        cancel: CancellationToken,
    ) -> Result<ExecutionHandle, ExecutorError> {
        let job_id = request.job_id.clone();
        let jobs_dir = &self.config.jobs_dir;
        let harness = self
            .harnesses
            .resolve(&request.harness)
            .ok_or_else(|| ExecutorError::NoHarness(request.harness.clone()))?;

        let paths = JobPaths::new(jobs_dir, &job_id);
        let log_path = paths.log();
        let log = process::prepare_log(&log_path).map_err(|source| ExecutorError::Io {
            path: log_path.clone(),
            source,
        })?;

        let command = harness.command(&request);
        info!(
            job_id = %job_id,
            harness = harness.name(),
            program = %command.program,
            "starting job"
        );

        let spawned = match process::spawn_logged(&command, &request, log) {
            Ok(spawned) => spawned,
            Err(e) => {
                remove_active(&self.active, &job_id, serial);
                let outcome = self.fail_spawn(&job_id, harness.name(), &e);
                outcome.dispatch(&job_id, callbacks.as_ref());
                let (outcome_tx, outcome_rx) = oneshot::channel();
                let _ = outcome_tx.send(outcome);
                return Ok(ExecutionHandle {
                    job_id,
                    pid: None,
                    jobs_dir: jobs_dir.clone(),
                    kill_tx: None,
                    outcome: outcome_rx,
                });
            }
        };
        let pid = spawned.pid;
        let mut child = spawned.child;

        let tracker = match JobTracker::create(jobs_dir, &job_id, harness.name(), Some(pid)) {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(job_id = %job_id, pid, error = %e, "failed to create status record, stopping agent");
                let grace = self.config.kill_grace;
                tokio::spawn(async move {
                    process::terminate_child(&mut child, grace).await;
                });
                return Err(e.into());
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tailer = LogTailer::start(&log_path, 0, self.config.tailer.clone(), events_tx);

        let run = JobRun {
            job_id: job_id.clone(),
            pid,
            child,
            stderr: spawned.stderr,
            tracker,
            handler: harness.handler(),
            tailer,
            events: events_rx,
            kill_requests: kill_rx,
            cancel,
            callbacks: Arc::clone(&callbacks),
            limits: JobLimits {
                idle_timeout: request.idle_timeout.or(self.config.idle_timeout),
                max_duration: request.max_duration.unwrap_or(self.config.max_duration),
                grace_period: self.config.grace_period,
                kill_grace: self.config.kill_grace,
            },
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let active = Arc::clone(&self.active);
        let task_job_id = job_id.clone();
        let task = tokio::spawn(async move {
            let outcome = run.run().await;
            // Deregister before reporting so a callback may restart the job.
            remove_active(&active, &task_job_id, serial);
            if let Some(outcome) = outcome {
                outcome.dispatch(&task_job_id, callbacks.as_ref());
                let _ = outcome_tx.send(outcome);
            }
        });

        if let Some(entry) = lock(&self.active).get_mut(&job_id) {
            if entry.serial == serial {
                entry.pid = Some(pid);
                entry.task = Some(task);
            }
        }

        debug!(job_id = %job_id, pid, "job started");
        Ok(ExecutionHandle {
            job_id,
            pid: Some(pid),
            jobs_dir: jobs_dir.clone(),
            kill_tx: Some(kill_tx),
            outcome: outcome_rx,
        })
    }

    fn fail_spawn(&self, job_id: &str, harness: &str, error: &anyhow::Error) -> JobOutcome {
        let reason = format!("spawn_error: {error:#}");
        warn!(job_id, error = %reason, "failed to start agent");
        let written = JobTracker::create(&self.config.jobs_dir, job_id, harness, None)
            .and_then(|tracker| tracker.fail(&reason, None));
        if let Err(e) = written {
            warn!(job_id, error = %e, "failed to record spawn failure");
        }
        JobOutcome::failed(reason, String::new(), false)
    }

    /// Whether a job with this id has a live execution.
    pub fn is_active(&self, job_id: &str) -> bool {
        lock(&self.active).contains_key(job_id)
    }

    /// Ids of all jobs with a live execution, sorted.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Pid of an active job's process.
    pub fn pid_of(&self, job_id: &str) -> Option<u32> {
        lock(&self.active).get(job_id).and_then(|job| job.pid)
    }

    /// Request an external kill of an active job. Reported as a failure with
    /// reason `killed`.
    pub fn kill(&self, job_id: &str) -> bool {
        lock(&self.active)
            .get(job_id)
            .is_some_and(|job| job.kill_tx.send(()).is_ok())
    }

    /// Kill every active job and wait for their tasks to wind down.
    ///
    /// No callbacks fire and status records stay `running`, so the jobs
    /// show up as orphans on the next reconciliation.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, ActiveJob)> = lock(&self.active).drain().collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "shutting down active jobs");

        for (_, job) in &drained {
            job.cancel.cancel();
        }
        let tasks = drained.into_iter().filter_map(|(job_id, job)| {
            job.task.map(|task| async move {
                if let Err(e) = task.await {
                    warn!(job_id = %job_id, error = %e, "job task ended abnormally");
                }
            })
        });
        futures::future::join_all(tasks).await;
    }
}

/// Handle to one started job.
#[derive(Debug)]
pub struct ExecutionHandle {
    job_id: String,
    pid: Option<u32>,
    jobs_dir: PathBuf,
    kill_tx: Option<mpsc::UnboundedSender<()>>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl ExecutionHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Pid of the agent process; `None` when the spawn failed.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the job to stop. Returns `false` once the job has finished.
    pub fn kill(&self) -> bool {
        self.kill_tx
            .as_ref()
            .is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Current status record from disk.
    pub fn status(&self) -> Result<StatusRecord, TrackerError> {
        load_record(&self.jobs_dir, &self.job_id)
    }

    /// Wait for the job's outcome. `None` if the job was abandoned by
    /// [`Executor::shutdown_all`].
    pub async fn wait(self) -> Option<JobOutcome> {
        self.outcome.await.ok()
    }
}
