//! `spool status` command: show one job in detail or list all jobs.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use spool_core::StatusRecord;
use spool_core::executor::process::is_pid_alive;
use spool_core::tracker::{JobStatus, list_records, load_record};

/// Run the status command.
///
/// When `job_id` is `Some`, shows detailed status for that job.
/// When `None`, lists all jobs.
pub fn run_status(jobs_dir: &Path, job_id: Option<&str>) -> Result<()> {
    match job_id {
        Some(id) => run_job_status(jobs_dir, id),
        None => run_all_status(jobs_dir),
    }
}

/// Show detailed status for a single job.
fn run_job_status(jobs_dir: &Path, job_id: &str) -> Result<()> {
    let record =
        load_record(jobs_dir, job_id).with_context(|| format!("job {job_id} not found"))?;

    println!("Job: {} ({})", record.job_id, record.harness);
    println!("Status: {}", status_label(&record));
    if let Some(reason) = &record.status_reason {
        println!("Reason: {reason}");
    }
    if let Some(pid) = record.pid {
        println!("PID: {pid}");
    }
    println!("Started: {}", record.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(ended_at) = record.ended_at {
        println!("Ended: {}", ended_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Duration: {}", format_duration(&record, Utc::now()));
    println!("Read position: {}", record.read_position);

    if !record.event_counts.is_empty() {
        println!();
        println!("Events:");
        for (event_type, count) in &record.event_counts {
            println!("  {event_type:<24} {count:>8}");
        }
    }

    if let Some(completion) = &record.completion {
        if let Some(session) = &completion.session_id {
            println!();
            println!("Session: {session}");
        }
        if !completion.message.is_empty() {
            println!();
            println!("{}", completion.message);
        }
    }

    Ok(())
}

/// List all jobs, oldest first.
fn run_all_status(jobs_dir: &Path) -> Result<()> {
    let records = list_records(jobs_dir)?;

    if records.is_empty() {
        println!("No jobs found in {}.", jobs_dir.display());
        return Ok(());
    }

    println!(
        "{:<38} {:<8} {:<12} {:<20} {:>10}",
        "ID", "HARNESS", "STATUS", "STARTED", "DURATION"
    );
    println!("{}", "-".repeat(92));

    let now = Utc::now();
    for record in &records {
        let id_display = if record.job_id.chars().count() > 36 {
            format!("{}...", record.job_id.chars().take(33).collect::<String>())
        } else {
            record.job_id.clone()
        };
        println!(
            "{:<38} {:<8} {:<12} {:<20} {:>10}",
            id_display,
            record.harness,
            status_label(record),
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(record, now),
        );
    }

    Ok(())
}

/// Status text, flagging `running` records whose process is gone.
fn status_label(record: &StatusRecord) -> String {
    match (record.status, record.pid) {
        (JobStatus::Running, Some(pid)) if !is_pid_alive(pid) => "orphaned".to_string(),
        (status, _) => status.to_string(),
    }
}

fn format_duration(record: &StatusRecord, now: DateTime<Utc>) -> String {
    let end = record.ended_at.unwrap_or(now);
    let secs = (end - record.started_at).num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
