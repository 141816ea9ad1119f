//! Per-job supervision task.
//!
//! One task owns the child, the tailer, the stream handler, the tracker and
//! both timers. Every transition happens inside [`JobRun::run`], so the
//! terminal-event path and the exit path can never both finalize a job.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::callbacks::{JobCallbacks, JobOutcome};
use super::process::{self, StderrTail};
use crate::harness::{StreamHandler, event_type_label};
use crate::tailer::{LogTailer, TailEvent};
use crate::tracker::JobTracker;

/// Stand-in deadline for disarmed timers.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Timing limits resolved for one job.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobLimits {
    pub idle_timeout: Option<Duration>,
    pub max_duration: Duration,
    pub grace_period: Duration,
    pub kill_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillCause {
    IdleTimeout,
    MaxDuration,
    External,
}

impl KillCause {
    fn label(self) -> &'static str {
        match self {
            KillCause::IdleTimeout => "idle_timeout",
            KillCause::MaxDuration => "max_duration",
            KillCause::External => "killed",
        }
    }
}

/// Where the job is while its process is still alive.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Streaming,
    Killing { cause: KillCause, sigkill_sent: bool },
}

pub(crate) struct JobRun {
    pub job_id: String,
    pub pid: u32,
    pub child: Child,
    pub stderr: StderrTail,
    pub tracker: JobTracker,
    pub handler: Box<dyn StreamHandler>,
    pub tailer: LogTailer,
    pub events: mpsc::UnboundedReceiver<TailEvent>,
    pub kill_requests: mpsc::UnboundedReceiver<()>,
    pub cancel: CancellationToken,
    pub callbacks: Arc<dyn JobCallbacks>,
    pub limits: JobLimits,
}

impl JobRun {
    /// Drive the job to its outcome.
    ///
    /// Returns `None` when the job was abandoned by a bulk shutdown; its
    /// record stays `running` for the next reconciliation.
    pub(crate) async fn run(mut self) -> Option<JobOutcome> {
        let idle_limit = self.limits.idle_timeout;
        let max_timer = tokio::time::sleep(self.limits.max_duration);
        let idle_timer = tokio::time::sleep(idle_limit.unwrap_or(FAR_FUTURE));
        let sigkill_timer = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(max_timer, idle_timer, sigkill_timer);

        let mut phase = Phase::Streaming;
        let mut kill_channel_open = true;

        loop {
            let streaming = matches!(phase, Phase::Streaming);
            let escalation_pending = matches!(
                phase,
                Phase::Killing {
                    sigkill_sent: false,
                    ..
                }
            );

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.abandon().await;
                    return None;
                }

                Some(event) = self.events.recv() => {
                    if self.apply(event) {
                        if let Some(limit) = idle_limit {
                            idle_timer.as_mut().reset(Instant::now() + limit);
                        }
                    }
                    if streaming && self.handler.is_complete() {
                        return self.finish_terminal().await;
                    }
                }

                status = self.child.wait() => {
                    let status = match status {
                        Ok(status) => Some(status),
                        Err(e) => {
                            warn!(job_id = %self.job_id, error = %e, "failed to collect exit status");
                            None
                        }
                    };
                    return self.finish_exit(status, phase).await;
                }

                _ = &mut max_timer, if streaming => {
                    phase = self.begin_kill(KillCause::MaxDuration);
                    sigkill_timer.as_mut().reset(Instant::now() + self.limits.kill_grace);
                }

                _ = &mut idle_timer, if streaming && idle_limit.is_some() => {
                    phase = self.begin_kill(KillCause::IdleTimeout);
                    sigkill_timer.as_mut().reset(Instant::now() + self.limits.kill_grace);
                }

                request = self.kill_requests.recv(), if streaming && kill_channel_open => {
                    match request {
                        Some(()) => {
                            phase = self.begin_kill(KillCause::External);
                            sigkill_timer.as_mut().reset(Instant::now() + self.limits.kill_grace);
                        }
                        None => kill_channel_open = false,
                    }
                }

                _ = &mut sigkill_timer, if escalation_pending => {
                    if let Phase::Killing { cause, .. } = phase {
                        warn!(job_id = %self.job_id, pid = self.pid, "process ignored SIGTERM, sending SIGKILL");
                        if let Err(e) = self.child.start_kill() {
                            warn!(job_id = %self.job_id, error = %e, "SIGKILL failed");
                        }
                        phase = Phase::Killing { cause, sigkill_sent: true };
                    }
                }
            }
        }
    }

    /// Feed one tailer event to the handler and tracker. Returns `true` for
    /// events that count as agent activity.
    fn apply(&mut self, event: TailEvent) -> bool {
        match event {
            TailEvent::Event(value) => {
                self.callbacks.on_event(&self.job_id, &value);
                self.handler.on_event(&value);
                self.tracker.record_event(event_type_label(&value));
                true
            }
            TailEvent::RawLine(line) => {
                debug!(job_id = %self.job_id, line = %line, "non-JSON output line");
                self.tracker.record_event("raw");
                true
            }
            TailEvent::Position(offset) => {
                self.tracker.set_read_position(offset);
                false
            }
        }
    }

    fn begin_kill(&self, cause: KillCause) -> Phase {
        info!(job_id = %self.job_id, pid = self.pid, cause = cause.label(), "stopping job");
        if !process::send_sigterm(self.pid) {
            warn!(job_id = %self.job_id, pid = self.pid, "SIGTERM failed");
        }
        Phase::Killing {
            cause,
            sigkill_sent: false,
        }
    }

    /// The terminal event was observed: give the process a short grace
    /// period to exit, then finalize from the handler.
    ///
    /// Returns `None` if a bulk shutdown arrives during the grace period.
    async fn finish_terminal(mut self) -> Option<JobOutcome> {
        self.tailer.flush().await;
        self.tailer.stop().await;
        self.drain_remaining();

        let waited = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            waited = tokio::time::timeout(self.limits.grace_period, self.child.wait()) => {
                Some(waited.is_ok())
            }
        };
        let Some(exited) = waited else {
            self.abandon().await;
            return None;
        };

        let exit_was_forced = !exited;
        if exit_was_forced {
            warn!(
                job_id = %self.job_id,
                pid = self.pid,
                "process still running after terminal event, killing"
            );
            if let Err(e) = self.child.kill().await {
                warn!(job_id = %self.job_id, error = %e, "failed to kill process");
            }
        }

        let result = self.handler.result();
        let outcome = if self.handler.is_success() {
            JobOutcome::Complete {
                result,
                session_id: self.handler.session_id().map(str::to_string),
                exit_was_forced,
            }
        } else {
            let reason = self.handler.failure_reason().unwrap_or("terminal_error");
            JobOutcome::failed(reason, result, exit_was_forced)
        };
        Some(self.finalize(outcome, None).await)
    }

    /// The process exited before any terminal event was seen.
    async fn finish_exit(mut self, status: Option<ExitStatus>, phase: Phase) -> Option<JobOutcome> {
        self.tailer.flush().await;
        self.tailer.stop().await;
        self.drain_remaining();
        if matches!(phase, Phase::Streaming) && self.handler.is_complete() {
            // The terminal event was still queued; the grace wait returns at
            // once because the process is gone.
            return self.finish_terminal().await;
        }

        let partial = self.handler.result();
        let outcome = match phase {
            Phase::Killing {
                cause: KillCause::External,
                ..
            } => {
                let outcome = JobOutcome::failed(KillCause::External.label(), partial, true);
                self.finalize(outcome, None).await
            }
            Phase::Killing { cause, .. } => {
                let outcome = JobOutcome::timed_out(partial);
                self.finalize(outcome, Some(cause)).await
            }
            Phase::Streaming => {
                let mut reason = process::exit_reason(status);
                if let Some(detail) = self.handler.failure_reason() {
                    reason = format!("{reason}: {detail}");
                }
                let outcome = JobOutcome::failed(reason, partial, false);
                self.finalize(outcome, None).await
            }
        };
        Some(outcome)
    }

    /// Deliver whatever the stopped tailer had already queued. A completed
    /// handler ignores these; callbacks and counters still see them.
    fn drain_remaining(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
    }

    async fn finalize(self, outcome: JobOutcome, timer: Option<KillCause>) -> JobOutcome {
        let JobRun {
            job_id,
            tracker,
            stderr,
            ..
        } = self;

        if !outcome.is_complete() {
            let tail = stderr.collect().await;
            let tail = tail.trim();
            if !tail.is_empty() {
                warn!(job_id = %job_id, stderr = %tail, "agent stderr");
            }
        }

        let written = match &outcome {
            JobOutcome::Complete {
                result, session_id, ..
            } => tracker.complete(result, session_id.as_deref()),
            JobOutcome::Failed {
                reason, partial, ..
            } => tracker.fail(reason, partial.as_deref()),
            JobOutcome::TimedOut { partial } => {
                let label = timer.unwrap_or(KillCause::MaxDuration).label();
                tracker.timeout(label, partial.as_deref())
            }
        };

        match written {
            Ok(record) => info!(
                job_id = %job_id,
                status = %record.status,
                reason = record.status_reason.as_deref().unwrap_or(""),
                "job finished"
            ),
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to write final status"),
        }
        outcome
    }

    /// Bulk shutdown: kill the child and leave the record untouched.
    async fn abandon(&mut self) {
        self.tailer.stop().await;
        process::terminate_child(&mut self.child, self.limits.kill_grace).await;
        info!(job_id = %self.job_id, pid = self.pid, "job abandoned during shutdown");
    }
}
