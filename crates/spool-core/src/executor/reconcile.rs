//! Recovery of jobs left `running` by a coordinator that went away.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::callbacks::{JobCallbacks, JobOutcome};
use super::process;
use super::{Executor, ExecutorError};
use crate::harness::StreamHandler;
use crate::tailer::{TailEvent, parse_line};
use crate::tracker::{JobStatus, JobTracker, StatusRecord, list_records};

/// One job settled by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledJob {
    pub job_id: String,
    pub outcome: JobOutcome,
}

/// Everything a reconciliation pass settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub jobs: Vec<ReconciledJob>,
}

impl ReconcileReport {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, job_id: &str) -> Option<&JobOutcome> {
        self.jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| &job.outcome)
    }
}

/// Feed every complete JSON line of `path` from byte `from` into `handler`.
///
/// Returns the offset reached, or `None` if the log does not exist. A
/// `from` beyond the end of the file means the log was truncated, and the
/// scan restarts at 0.
pub fn replay_log(path: &Path, from: u64, handler: &mut dyn StreamHandler) -> Result<Option<u64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to open log {}", path.display()));
        }
    };
    let size = file
        .metadata()
        .with_context(|| format!("failed to stat log {}", path.display()))?
        .len();
    let start = if from > size { 0 } else { from };

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(start))
        .with_context(|| format!("failed to seek log {}", path.display()))?;

    let mut offset = start;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("failed to read log {}", path.display()))?;
        if n == 0 {
            break;
        }
        offset += n as u64;
        if let Some(TailEvent::Event(value)) = parse_line(&String::from_utf8_lossy(&line)) {
            handler.on_event(&value);
        }
    }
    Ok(Some(offset))
}

impl Executor {
    /// Settle every job whose record says `running` but that has no live
    /// execution in this executor.
    ///
    /// A still-alive orphan process is terminated first, then its whole log
    /// is replayed through a fresh handler. The persisted read position only
    /// says how far the dead coordinator got; the handler state it built up
    /// is gone, so replay always starts at 0. Each settled job is
    /// reported through `callbacks`. A failure on one job marks it `error`
    /// and the pass moves on.
    pub async fn reconcile_orphans(
        &self,
        callbacks: &dyn JobCallbacks,
    ) -> Result<ReconcileReport, ExecutorError> {
        let records = list_records(&self.config.jobs_dir)?;
        let mut report = ReconcileReport::default();

        for record in records {
            if record.status != JobStatus::Running || self.is_active(&record.job_id) {
                continue;
            }

            let outcome = match self.reconcile_one(&record).await {
                Ok(outcome) => outcome,
                Err(e) => self.mark_reconcile_failed(&record.job_id, &e),
            };

            outcome.dispatch(&record.job_id, callbacks);
            report.jobs.push(ReconciledJob {
                job_id: record.job_id,
                outcome,
            });
        }

        if !report.is_empty() {
            info!(count = report.len(), "reconciled orphaned jobs");
        }
        Ok(report)
    }

    async fn reconcile_one(&self, record: &StatusRecord) -> Result<JobOutcome> {
        let job_id = record.job_id.as_str();

        let mut exit_was_forced = false;
        if let Some(pid) = record.pid {
            if process::is_pid_alive(pid) {
                info!(job_id, pid, "terminating orphaned agent process");
                if !process::terminate_pid(pid, self.config.kill_grace).await {
                    warn!(job_id, pid, "orphaned process still alive after SIGKILL");
                }
                exit_was_forced = true;
            }
        }

        let harness = self
            .harnesses
            .resolve(&record.harness)
            .with_context(|| format!("no harness available for '{}'", record.harness))?;
        let mut tracker = JobTracker::open(&self.config.jobs_dir, job_id)?;
        let mut handler = harness.handler();

        let log_path = tracker.paths().log();
        let Some(end) = replay_log(&log_path, 0, handler.as_mut())? else {
            warn!(job_id, "orphaned job has no log");
            tracker.fail("orphaned_no_log", None)?;
            return Ok(JobOutcome::failed("orphaned_no_log", String::new(), exit_was_forced));
        };
        if end != record.read_position {
            debug!(job_id, from = record.read_position, to = end, "replay moved read position");
        }
        tracker.set_read_position(end);

        let result = handler.result();
        if handler.is_complete() && handler.is_success() {
            let session_id = handler.session_id().map(str::to_string);
            tracker.complete(&result, session_id.as_deref())?;
            info!(job_id, "orphaned job had finished; marked complete");
            Ok(JobOutcome::Complete {
                result,
                session_id,
                exit_was_forced,
            })
        } else {
            let partial = (!result.is_empty()).then_some(result.as_str());
            tracker.fail("orphaned_interrupted", partial)?;
            info!(job_id, "orphaned job marked interrupted");
            Ok(JobOutcome::failed("orphaned_interrupted", result, exit_was_forced))
        }
    }

    fn mark_reconcile_failed(&self, job_id: &str, error: &anyhow::Error) -> JobOutcome {
        let reason = format!("reconcile_failed: {error:#}");
        warn!(job_id, error = %reason, "failed to reconcile orphaned job");
        let written = JobTracker::open(&self.config.jobs_dir, job_id)
            .and_then(|tracker| tracker.fail(&reason, None));
        if let Err(e) = written {
            warn!(job_id, error = %e, "failed to record reconcile failure");
        }
        JobOutcome::failed(reason, String::new(), false)
    }
}
