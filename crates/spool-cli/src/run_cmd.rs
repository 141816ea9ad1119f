//! `spool run` command: run one job in the foreground.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde_json::Value;

use spool_core::harness::event_type_label;
use spool_core::{Executor, ExecutorConfig, JobCallbacks, JobOutcome, JobRequest};

/// Options for `spool run`, as parsed from the command line.
#[derive(Debug)]
pub struct RunOptions {
    pub harness: String,
    pub job_id: Option<String>,
    pub model: Option<String>,
    pub resume: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<String>,
    pub idle_timeout: Option<u64>,
    pub timeout: Option<u64>,
    pub prompt: String,
}

impl RunOptions {
    fn into_request(self) -> Result<JobRequest> {
        let job_id = self
            .job_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut request = JobRequest::new(job_id, self.harness, self.prompt);
        request.model = self.model;
        request.resume_session_id = self.resume;
        request.working_dir = self.cwd;
        request.env_vars = parse_env_vars(&self.env)?;
        request.idle_timeout = self.idle_timeout.map(Duration::from_secs);
        request.max_duration = self.timeout.map(Duration::from_secs);
        Ok(request)
    }
}

/// Parse `KEY=VALUE` pairs.
pub fn parse_env_vars(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --env value '{pair}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid --env value '{pair}': empty key");
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Prints outcomes as they are reported.
pub struct PrintCallbacks;

impl JobCallbacks for PrintCallbacks {
    fn on_complete(&self, job_id: &str, result: &str, session_id: Option<&str>, forced: bool) {
        println!("Job {job_id} complete{}", if forced { " (forced exit)" } else { "" });
        if let Some(session) = session_id {
            println!("Session: {session}");
        }
        if !result.is_empty() {
            println!();
            println!("{result}");
        }
    }

    fn on_fail(&self, job_id: &str, reason: &str, partial: Option<&str>, _forced: bool) {
        eprintln!("Job {job_id} failed: {reason}");
        if let Some(text) = partial {
            eprintln!();
            eprintln!("{text}");
        }
    }

    fn on_timeout(&self, job_id: &str, partial: Option<&str>) {
        eprintln!("Job {job_id} timed out");
        if let Some(text) = partial {
            eprintln!();
            eprintln!("{text}");
        }
    }

    fn on_event(&self, job_id: &str, event: &Value) {
        tracing::debug!(job_id, event_type = event_type_label(event), "agent event");
    }
}

/// Run the run command. Returns `true` if the job completed.
pub async fn run_job(config: ExecutorConfig, options: RunOptions) -> Result<bool> {
    let request = options.into_request()?;
    let executor = Executor::from_config(config);
    let callbacks = Arc::new(PrintCallbacks);

    let report = executor.reconcile_orphans(callbacks.as_ref()).await?;
    if !report.is_empty() {
        println!("Reconciled {} orphaned job(s).", report.len());
        println!();
    }

    let job_id = request.job_id.clone();
    let handle = executor.start(request, callbacks)?;
    match handle.pid() {
        Some(pid) => println!("Started job {job_id} (pid {pid})"),
        None => println!("Started job {job_id}"),
    }

    tokio::select! {
        outcome = handle.wait() => Ok(matches!(outcome, Some(JobOutcome::Complete { .. }))),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; stopping job {job_id}.");
            executor.shutdown_all().await;
            eprintln!("Job left running in the status record; `spool reconcile` will settle it.");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_vars_accepts_pairs() {
        let vars = parse_env_vars(&["A=1".into(), "B=x=y".into(), "C=".into()]).unwrap();
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["B"], "x=y");
        assert_eq!(vars["C"], "");
    }

    #[test]
    fn parse_env_vars_rejects_malformed() {
        assert!(parse_env_vars(&["NOEQUALS".into()]).is_err());
        assert!(parse_env_vars(&["=value".into()]).is_err());
    }

    #[test]
    fn request_gets_generated_id_and_timeouts() {
        let options = RunOptions {
            harness: "codex".into(),
            job_id: None,
            model: Some("o3".into()),
            resume: None,
            cwd: None,
            env: vec!["K=V".into()],
            idle_timeout: Some(30),
            timeout: None,
            prompt: "fix it".into(),
        };
        let request = options.into_request().unwrap();
        assert!(uuid::Uuid::parse_str(&request.job_id).is_ok());
        assert_eq!(request.harness, "codex");
        assert_eq!(request.model.as_deref(), Some("o3"));
        assert_eq!(request.idle_timeout, Some(Duration::from_secs(30)));
        assert!(request.max_duration.is_none());
        assert_eq!(request.env_vars["K"], "V");
    }
}
