//! `spool reconcile` command: settle jobs orphaned by a dead coordinator.

use anyhow::Result;

use spool_core::{Executor, ExecutorConfig, JobOutcome};

use crate::run_cmd::PrintCallbacks;

/// Run the reconcile command.
pub async fn run_reconcile(config: ExecutorConfig) -> Result<()> {
    let executor = Executor::from_config(config);
    let report = executor.reconcile_orphans(&PrintCallbacks).await?;

    if report.is_empty() {
        println!("No orphaned jobs.");
        return Ok(());
    }

    println!();
    println!("{:<38} {:<10} REASON", "ID", "OUTCOME");
    println!("{}", "-".repeat(72));
    for job in &report.jobs {
        let (label, reason) = match &job.outcome {
            JobOutcome::Complete { .. } => ("complete", ""),
            JobOutcome::Failed { reason, .. } => ("error", reason.as_str()),
            JobOutcome::TimedOut { .. } => ("timeout", ""),
        };
        println!("{:<38} {:<10} {reason}", job.job_id, label);
    }

    Ok(())
}
