//! File-backed job status records.
//!
//! Every job owns a directory under the jobs root:
//!
//! ```text
//! <jobs_root>/<job_id>/
//!     output.jsonl   -- NDJSON written by the agent process (append-only)
//!     status.json    -- StatusRecord, owned by the JobTracker
//! ```
//!
//! The status record is rewritten atomically (temp file + rename) on every
//! update so a coordinator crash never leaves a torn record behind. Terminal
//! transitions consume the [`JobTracker`], so a job can be finalized at most
//! once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Name of the per-job NDJSON log file.
pub const LOG_FILE: &str = "output.jsonl";
/// Name of the per-job status record.
pub const STATUS_FILE: &str = "status.json";

/// Errors from reading or writing status records.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed status record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize status record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no status record for job {0}")]
    NotFound(String),
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Complete,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Final (or partial) output of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The persisted `status.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub harness: String,
    pub pid: Option<u32>,
    pub status: JobStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_position: u64,
    #[serde(default)]
    pub event_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub completion: Option<Completion>,
}

/// Paths inside one job directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    dir: PathBuf,
}

impl JobPaths {
    pub fn new(jobs_root: &Path, job_id: &str) -> Self {
        Self {
            dir: jobs_root.join(job_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn status(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }
}

/// Owner of one job's status record.
#[derive(Debug)]
pub struct JobTracker {
    paths: JobPaths,
    record: StatusRecord,
}

impl JobTracker {
    /// Create the job directory and an initial `running` record.
    pub fn create(
        jobs_root: &Path,
        job_id: &str,
        harness: &str,
        pid: Option<u32>,
    ) -> Result<Self, TrackerError> {
        let paths = JobPaths::new(jobs_root, job_id);
        std::fs::create_dir_all(paths.dir()).map_err(|source| TrackerError::Io {
            path: paths.dir().to_path_buf(),
            source,
        })?;

        let record = StatusRecord {
            job_id: job_id.to_string(),
            harness: harness.to_string(),
            pid,
            status: JobStatus::Running,
            status_reason: None,
            started_at: Utc::now(),
            ended_at: None,
            read_position: 0,
            event_counts: BTreeMap::new(),
            completion: None,
        };

        let tracker = Self { paths, record };
        tracker.persist()?;
        debug!(job_id, harness, ?pid, "created status record");
        Ok(tracker)
    }

    /// Open an existing record for further updates.
    pub fn open(jobs_root: &Path, job_id: &str) -> Result<Self, TrackerError> {
        let record = load_record(jobs_root, job_id)?;
        Ok(Self {
            paths: JobPaths::new(jobs_root, job_id),
            record,
        })
    }

    pub fn record(&self) -> &StatusRecord {
        &self.record
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Count one observed event. Best-effort: write failures are logged.
    pub fn record_event(&mut self, event_type: &str) {
        *self
            .record
            .event_counts
            .entry(event_type.to_string())
            .or_insert(0) += 1;
        self.persist_best_effort();
    }

    /// Persist the tailer's read offset. Best-effort: write failures are
    /// logged.
    pub fn set_read_position(&mut self, offset: u64) {
        if self.record.read_position == offset {
            return;
        }
        self.record.read_position = offset;
        self.persist_best_effort();
    }

    /// Transition to `complete`.
    pub fn complete(
        self,
        result: &str,
        session_id: Option<&str>,
    ) -> Result<StatusRecord, TrackerError> {
        self.finish(
            JobStatus::Complete,
            None,
            Completion {
                message: result.to_string(),
                session_id: session_id.map(str::to_string),
            },
        )
    }

    /// Transition to `error`, keeping whatever partial text was produced.
    pub fn fail(self, reason: &str, partial: Option<&str>) -> Result<StatusRecord, TrackerError> {
        self.finish(
            JobStatus::Error,
            Some(reason.to_string()),
            Completion {
                message: partial.unwrap_or_default().to_string(),
                session_id: None,
            },
        )
    }

    /// Transition to `timeout`. `reason` names the timer that fired.
    pub fn timeout(
        self,
        reason: &str,
        partial: Option<&str>,
    ) -> Result<StatusRecord, TrackerError> {
        self.finish(
            JobStatus::Timeout,
            Some(reason.to_string()),
            Completion {
                message: partial.unwrap_or_default().to_string(),
                session_id: None,
            },
        )
    }

    fn finish(
        mut self,
        status: JobStatus,
        reason: Option<String>,
        completion: Completion,
    ) -> Result<StatusRecord, TrackerError> {
        self.record.status = status;
        self.record.status_reason = reason;
        self.record.ended_at = Some(Utc::now());
        self.record.completion = Some(completion);
        self.persist()?;
        debug!(
            job_id = %self.record.job_id,
            status = %status,
            reason = ?self.record.status_reason,
            "finalized status record"
        );
        Ok(self.record)
    }

    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!(job_id = %self.record.job_id, error = %e, "failed to update status record");
        }
    }

    fn persist(&self) -> Result<(), TrackerError> {
        let path = self.paths.status();
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.record)?;
        std::fs::write(&tmp_path, json.as_bytes())
            .and_then(|_| std::fs::rename(&tmp_path, &path))
            .map_err(|source| TrackerError::Io { path, source })
    }
}

/// Read one job's status record.
pub fn load_record(jobs_root: &Path, job_id: &str) -> Result<StatusRecord, TrackerError> {
    let path = JobPaths::new(jobs_root, job_id).status();
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TrackerError::NotFound(job_id.to_string()));
        }
        Err(source) => return Err(TrackerError::Io { path, source }),
    };
    serde_json::from_str(&contents).map_err(|source| TrackerError::Malformed { path, source })
}

/// Read every status record under `jobs_root`, sorted by start time.
///
/// Directories without a readable record are skipped with a warning. A
/// missing jobs root yields an empty list.
pub fn list_records(jobs_root: &Path) -> Result<Vec<StatusRecord>, TrackerError> {
    let entries = match std::fs::read_dir(jobs_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(TrackerError::Io {
                path: jobs_root.to_path_buf(),
                source,
            });
        }
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let job_id = entry.file_name().to_string_lossy().into_owned();
        match load_record(jobs_root, &job_id) {
            Ok(record) => records.push(record),
            Err(TrackerError::NotFound(_)) => {}
            Err(e) => warn!(job_id, error = %e, "skipping unreadable status record"),
        }
    }
    records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    Ok(records)
}
