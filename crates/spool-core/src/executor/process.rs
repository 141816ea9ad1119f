//! Process plumbing: spawning with stdout redirected into the job log,
//! stderr capture, liveness checks, and signal escalation.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::harness::{CommandSpec, JobRequest};

/// Bytes of stderr retained for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;

/// Create (or truncate) the job log and open it for appending.
pub(crate) fn prepare_log(log_path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::File::create(log_path)?;
    std::fs::OpenOptions::new().append(true).open(log_path)
}

/// A spawned agent process.
pub(crate) struct SpawnedProcess {
    pub child: Child,
    pub pid: u32,
    pub stderr: StderrTail,
}

/// Spawn `command` with stdout appended to `log` and stderr captured.
///
/// `log` is moved into the child's stdio and dropped here, so the
/// coordinator never keeps a write handle on the log.
pub(crate) fn spawn_logged(
    command: &CommandSpec,
    request: &JobRequest,
    log: std::fs::File,
) -> Result<SpawnedProcess> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);

    if let Some(dir) = &request.working_dir {
        cmd.current_dir(dir);
    }

    // Environment variables (merge, don't replace the entire env).
    for (key, value) in &request.env_vars {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(log));
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "failed to spawn '{}' -- is it installed and on PATH?",
            command.program
        )
    })?;

    let pid = child.id().context("child process has no pid")?;
    let stderr = StderrTail::capture(child.stderr.take());

    Ok(SpawnedProcess { child, pid, stderr })
}

/// Background reader keeping the last few KiB of a child's stderr.
pub(crate) struct StderrTail {
    task: Option<JoinHandle<String>>,
}

impl StderrTail {
    fn capture(stderr: Option<ChildStderr>) -> Self {
        let task = stderr.map(|mut pipe| {
            tokio::spawn(async move {
                let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
                let mut buf = [0u8; 1024];
                loop {
                    match pipe.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend(&buf[..n]);
                            let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                            tail.drain(..excess);
                        }
                    }
                }
                let bytes: Vec<u8> = tail.into();
                String::from_utf8_lossy(&bytes).into_owned()
            })
        });
        Self { task }
    }

    /// Wait briefly for the captured tail. Grandchildren can keep the pipe
    /// open after the agent exits, so this never waits long.
    pub(crate) async fn collect(mut self) -> String {
        let Some(task) = self.task.take() else {
            return String::new();
        };
        match tokio::time::timeout(Duration::from_secs(1), task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        }
    }
}

/// Send SIGTERM to `pid`. Returns `false` if the signal could not be sent.
pub(crate) fn send_sigterm(pid: u32) -> bool {
    send_signal(pid, Signal::Term)
}

/// Send SIGKILL to `pid`. Returns `false` if the signal could not be sent.
pub(crate) fn send_sigkill(pid: u32) -> bool {
    send_signal(pid, Signal::Kill)
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: plain kill(2) on a positive pid; no memory is shared.
    unsafe { libc::kill(pid, sig) == 0 }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> bool {
    false
}

/// Check whether a process with this pid exists.
///
/// Uses `kill(pid, 0)`; EPERM means the process exists but belongs to
/// someone else, which still counts as alive.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for process existence.
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}

/// SIGTERM a child we own, wait up to `grace`, then SIGKILL.
///
/// Returns the exit status when it could be collected.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Some(pid) = child.id() {
        if !send_sigterm(pid) {
            warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("process exited after SIGTERM");
            Some(status)
        }
        _ => {
            debug!("process did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
            child.try_wait().ok().flatten()
        }
    }
}

/// SIGTERM a process we do not own (an orphan from a previous
/// coordinator), poll until it is gone or `grace` elapses, then SIGKILL.
///
/// Returns `true` if the process is confirmed gone.
pub(crate) async fn terminate_pid(pid: u32, grace: Duration) -> bool {
    const POLL: Duration = Duration::from_millis(50);

    if !send_sigterm(pid) {
        return !is_pid_alive(pid);
    }
    if wait_for_exit(pid, grace, POLL).await {
        return true;
    }

    warn!(pid, "orphan ignored SIGTERM, sending SIGKILL");
    send_sigkill(pid);
    wait_for_exit(pid, Duration::from_secs(1), POLL).await
}

async fn wait_for_exit(pid: u32, limit: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !is_pid_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Render an exit status as a failure-reason fragment.
pub(crate) fn exit_reason(status: Option<ExitStatus>) -> String {
    match status.and_then(|s| s.code()) {
        Some(code) => format!("exit_code_{code}"),
        None if status.is_some() => "exit_code_signal".to_string(),
        None => "exit_code_unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_pid_alive(0));
        assert!(!send_sigterm(0));
    }

    #[test]
    fn exit_reason_without_status() {
        assert_eq!(exit_reason(None), "exit_code_unknown");
    }

    #[tokio::test]
    async fn exit_reason_formats_codes() {
        let status = Command::new("sh").arg("-c").arg("exit 3").status().await.unwrap();
        assert_eq!(exit_reason(Some(status)), "exit_code_3");
    }

    #[tokio::test]
    async fn prepare_log_truncates_existing_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("job").join("output.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale\n").unwrap();

        let file = prepare_log(&path).unwrap();
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn spawn_redirects_stdout_and_captures_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log_path = tmp.path().join("output.jsonl");
        let log = prepare_log(&log_path).unwrap();

        let cmd = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo '{\"type\":\"x\"}'; echo oops >&2; echo \"$SPOOL_TEST_VAR\"");
        let mut req = JobRequest::new("j", "claude", "");
        req.env_vars.insert("SPOOL_TEST_VAR".into(), "from-env".into());

        let mut spawned = spawn_logged(&cmd, &req, log).unwrap();
        assert!(spawned.pid > 0);
        let status = spawned.child.wait().await.unwrap();
        assert!(status.success());

        assert_eq!(
            std::fs::read_to_string(&log_path).unwrap(),
            "{\"type\":\"x\"}\nfrom-env\n"
        );
        assert_eq!(spawned.stderr.collect().await, "oops\n");
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = prepare_log(&tmp.path().join("o.jsonl")).unwrap();
        let cmd = CommandSpec::new("/nonexistent/path/to/agent");
        let err = spawn_logged(&cmd, &JobRequest::default(), log).err().unwrap();
        assert!(format!("{err:#}").contains("failed to spawn"));
    }

    #[tokio::test]
    async fn terminate_child_stops_sleeper() {
        let mut child = Command::new("sleep").arg("3600").spawn().unwrap();
        let status = terminate_child(&mut child, Duration::from_secs(5)).await;
        assert!(status.is_some());
        assert!(!status.unwrap().success());
    }
}
