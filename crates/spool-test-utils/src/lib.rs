//! Shared test utilities for spool integration tests.
//!
//! Agent CLIs are replaced by small `/bin/sh` scripts that print canned
//! NDJSON, wired in through the executor's binary overrides. Outcomes are
//! captured with [`CaptureCallbacks`].

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;

use spool_core::{ExecutorConfig, JobCallbacks, JobOutcome, TailerConfig};

/// Write an executable `/bin/sh` script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}

/// Build a script body that prints each line to stdout, then runs `tail`
/// (e.g. `"exit 0"` or `"sleep 30"`).
pub fn emit_lines(lines: &[String], tail: &str) -> String {
    let mut body = String::from("cat <<'SPOOL_EOF'\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body.push_str("SPOOL_EOF\n");
    body.push_str(tail);
    body
}

/// A temporary workspace with a jobs root and a directory for fake
/// harness scripts.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.dir.path().join("jobs")
    }

    /// Executor config with fast polling and short kill escalation.
    pub fn config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::new(self.jobs_dir());
        config.kill_grace = Duration::from_millis(500);
        config.tailer = TailerConfig {
            poll_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(10),
        };
        config
    }

    /// Config whose `harness` binary is a script with `body`.
    pub fn config_with_script(&self, harness: &str, body: &str) -> ExecutorConfig {
        let script = write_script(self.dir.path(), &format!("fake-{harness}"), body);
        let mut config = self.config();
        config
            .binaries
            .insert(harness.to_string(), script.to_string_lossy().into_owned());
        config
    }

    /// Path of a job's log file.
    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(job_id).join("output.jsonl")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Pid of a process that has already exited and been reaped.
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("failed to spawn true");
    let pid = child.id();
    child.wait().expect("failed to wait for true");
    pid
}

// ---------------------------------------------------------------------------
// Canned protocol lines
// ---------------------------------------------------------------------------

fn line(value: Value) -> String {
    value.to_string()
}

pub fn claude_assistant(text: &str) -> String {
    line(json!({
        "type": "assistant",
        "message": { "content": [{ "type": "text", "text": text }] }
    }))
}

pub fn claude_result(subtype: &str, result: &str, session_id: &str) -> String {
    line(json!({
        "type": "result",
        "subtype": subtype,
        "is_error": subtype != "success",
        "result": result,
        "session_id": session_id
    }))
}

pub fn codex_message(text: &str) -> String {
    line(json!({
        "type": "item.completed",
        "item": { "type": "agent_message", "text": text }
    }))
}

pub fn codex_turn_completed() -> String {
    line(json!({ "type": "turn.completed" }))
}

pub fn gemini_message(text: &str) -> String {
    line(json!({ "type": "message", "role": "assistant", "content": text }))
}

pub fn gemini_result(status: &str) -> String {
    line(json!({ "type": "result", "status": status }))
}

// ---------------------------------------------------------------------------
// Callback capture
// ---------------------------------------------------------------------------

/// Records every callback invocation.
#[derive(Default)]
pub struct CaptureCallbacks {
    outcomes: Mutex<Vec<(String, JobOutcome)>>,
    events: Mutex<Vec<(String, Value)>>,
}

impl CaptureCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// All terminal outcomes in the order they were reported.
    pub fn outcomes(&self) -> Vec<(String, JobOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    /// Terminal outcomes reported for one job.
    pub fn outcomes_for(&self, job_id: &str) -> Vec<JobOutcome> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }

    /// Number of structured events seen for one job.
    pub fn event_count(&self, job_id: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .count()
    }

    fn push(&self, job_id: &str, outcome: JobOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((job_id.to_string(), outcome));
    }
}

impl JobCallbacks for CaptureCallbacks {
    fn on_complete(&self, job_id: &str, result: &str, session_id: Option<&str>, forced: bool) {
        self.push(
            job_id,
            JobOutcome::Complete {
                result: result.to_string(),
                session_id: session_id.map(str::to_string),
                exit_was_forced: forced,
            },
        );
    }

    fn on_fail(&self, job_id: &str, reason: &str, partial: Option<&str>, forced: bool) {
        self.push(
            job_id,
            JobOutcome::Failed {
                reason: reason.to_string(),
                partial: partial.map(str::to_string),
                exit_was_forced: forced,
            },
        );
    }

    fn on_timeout(&self, job_id: &str, partial: Option<&str>) {
        self.push(
            job_id,
            JobOutcome::TimedOut {
                partial: partial.map(str::to_string),
            },
        );
    }

    fn on_event(&self, job_id: &str, event: &Value) {
        self.events
            .lock()
            .unwrap()
            .push((job_id.to_string(), event.clone()));
    }
}
