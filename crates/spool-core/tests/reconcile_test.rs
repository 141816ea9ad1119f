//! Integration tests for orphan reconciliation and log replay.

use std::sync::Arc;
use std::time::Duration;

use spool_core::executor::{process::is_pid_alive, replay_log};
use spool_core::harness::{ClaudeStreamHandler, CodexStreamHandler, StreamHandler};
use spool_core::tailer::{TailCursor, TailEvent};
use spool_core::tracker::{JobTracker, load_record};
use spool_core::{Executor, JobOutcome, JobRequest, JobStatus};
use spool_test_utils::{
    CaptureCallbacks, TestEnv, claude_assistant, claude_result, codex_message,
    codex_turn_completed, dead_pid, emit_lines,
};

/// Leave a `running` record and a log behind, as a crashed coordinator
/// would.
fn orphan(env: &TestEnv, job_id: &str, harness: &str, pid: Option<u32>, log: Option<&str>) {
    JobTracker::create(&env.jobs_dir(), job_id, harness, pid).unwrap();
    if let Some(content) = log {
        std::fs::write(env.log_path(job_id), content).unwrap();
    }
}

fn lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

#[tokio::test]
async fn dead_orphan_with_partial_log_is_interrupted() {
    let env = TestEnv::new();
    let log = lines(&[claude_assistant("Hel"), claude_assistant("lo")]);
    orphan(&env, "o1", "claude", Some(dead_pid()), Some(&log));

    let exec = Executor::from_config(env.config());
    let callbacks = CaptureCallbacks::new();
    let report = exec.reconcile_orphans(&callbacks).await.unwrap();

    let expected = JobOutcome::Failed {
        reason: "orphaned_interrupted".into(),
        partial: Some("Hello".into()),
        exit_was_forced: false,
    };
    assert_eq!(report.get("o1"), Some(&expected));
    assert_eq!(callbacks.outcomes_for("o1"), vec![expected]);

    let record = load_record(&env.jobs_dir(), "o1").unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.status_reason.as_deref(), Some("orphaned_interrupted"));
    assert_eq!(record.completion.unwrap().message, "Hello");
    assert_eq!(record.read_position, log.len() as u64);
}

#[tokio::test]
async fn orphan_that_finished_is_marked_complete() {
    let env = TestEnv::new();
    let log = lines(&[
        codex_message("First"),
        codex_message("Second"),
        codex_turn_completed(),
    ]);
    orphan(&env, "o2", "codex", Some(dead_pid()), Some(&log));

    let exec = Executor::from_config(env.config());
    let callbacks = CaptureCallbacks::new();
    let report = exec.reconcile_orphans(&callbacks).await.unwrap();

    assert_eq!(
        report.get("o2"),
        Some(&JobOutcome::Complete {
            result: "First\n\nSecond".into(),
            session_id: None,
            exit_was_forced: false,
        })
    );
    let record = load_record(&env.jobs_dir(), "o2").unwrap();
    assert_eq!(record.status, JobStatus::Complete);
}

#[tokio::test]
async fn orphan_without_log_is_reported() {
    let env = TestEnv::new();
    orphan(&env, "o3", "claude", None, None);

    let exec = Executor::from_config(env.config());
    let callbacks = CaptureCallbacks::new();
    exec.reconcile_orphans(&callbacks).await.unwrap();

    match callbacks.outcomes_for("o3").as_slice() {
        [JobOutcome::Failed { reason, .. }] => assert_eq!(reason, "orphaned_no_log"),
        other => panic!("unexpected outcomes: {other:?}"),
    }
    let record = load_record(&env.jobs_dir(), "o3").unwrap();
    assert_eq!(record.status_reason.as_deref(), Some("orphaned_no_log"));
}

#[tokio::test]
async fn live_orphan_is_terminated_before_replay() {
    let env = TestEnv::new();
    let mut sleeper = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = sleeper.id();
    // Reap in the background so the pid disappears once killed.
    let reaper = std::thread::spawn(move || sleeper.wait());

    let log = lines(&[claude_result("success", "Final", "s1")]);
    orphan(&env, "live", "claude", Some(pid), Some(&log));

    let exec = Executor::from_config(env.config());
    let callbacks = CaptureCallbacks::new();
    let report = exec.reconcile_orphans(&callbacks).await.unwrap();

    assert_eq!(
        report.get("live"),
        Some(&JobOutcome::Complete {
            result: "Final".into(),
            session_id: Some("s1".into()),
            exit_was_forced: true,
        })
    );
    reaper.join().unwrap().unwrap();
    assert!(!is_pid_alive(pid));
}

#[tokio::test]
async fn replay_recovers_text_read_before_the_crash() {
    let env = TestEnv::new();
    let seen = lines(&[codex_message("First"), codex_message("Second")]);
    let log = format!("{seen}{}\n", codex_turn_completed());
    orphan(&env, "pos", "codex", Some(dead_pid()), Some(&log));

    // The dead coordinator had already consumed both messages.
    let mut tracker = JobTracker::open(&env.jobs_dir(), "pos").unwrap();
    tracker.set_read_position(seen.len() as u64);
    drop(tracker);

    let exec = Executor::from_config(env.config());
    let report = exec
        .reconcile_orphans(&CaptureCallbacks::new())
        .await
        .unwrap();

    assert_eq!(
        report.get("pos"),
        Some(&JobOutcome::Complete {
            result: "First\n\nSecond".into(),
            session_id: None,
            exit_was_forced: false,
        })
    );
    let record = load_record(&env.jobs_dir(), "pos").unwrap();
    assert_eq!(record.status, JobStatus::Complete);
    assert_eq!(record.completion.unwrap().message, "First\n\nSecond");
    assert_eq!(record.read_position, log.len() as u64);
}

#[tokio::test]
async fn finished_and_active_jobs_are_left_alone() {
    let env = TestEnv::new();
    let done = JobTracker::create(&env.jobs_dir(), "done", "claude", None).unwrap();
    done.complete("ok", None).unwrap();

    let exec = Executor::from_config(env.config_with_script("claude", "exec sleep 30"));
    let callbacks = Arc::new(CaptureCallbacks::new());
    let handle = exec
        .start(JobRequest::new("busy", "claude", "p"), callbacks.clone())
        .unwrap();

    let report = exec.reconcile_orphans(callbacks.as_ref()).await.unwrap();
    assert!(report.is_empty());
    assert!(exec.is_active("busy"));

    handle.kill();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn failing_orphan_does_not_stop_the_batch() {
    let env = TestEnv::new();
    JobTracker::create(&env.jobs_dir(), "bad", "claude", None).unwrap();
    // A directory where the log should be makes the replay read fail.
    std::fs::create_dir_all(env.log_path("bad")).unwrap();
    let log = lines(&[claude_assistant("x")]);
    orphan(&env, "good", "claude", None, Some(&log));

    let exec = Executor::from_config(env.config());
    let callbacks = CaptureCallbacks::new();
    let report = exec.reconcile_orphans(&callbacks).await.unwrap();

    assert_eq!(report.len(), 2);
    match report.get("bad") {
        Some(JobOutcome::Failed { reason, .. }) => {
            assert!(reason.starts_with("reconcile_failed: "), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let bad = load_record(&env.jobs_dir(), "bad").unwrap();
    assert_eq!(bad.status, JobStatus::Error);
    assert!(matches!(
        report.get("good"),
        Some(JobOutcome::Failed { reason, .. }) if reason == "orphaned_interrupted"
    ));
}

#[tokio::test]
async fn missing_jobs_root_reconciles_nothing() {
    let env = TestEnv::new();
    let exec = Executor::from_config(env.config());
    let report = exec
        .reconcile_orphans(&CaptureCallbacks::new())
        .await
        .unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn interrupted_live_job_is_recovered_after_shutdown() {
    let env = TestEnv::new();
    let body = emit_lines(&[claude_assistant("progress")], "exec sleep 30");
    let config = env.config_with_script("claude", &body);

    let first = Executor::from_config(config.clone());
    let handle = first
        .start(
            JobRequest::new("crash", "claude", "p"),
            Arc::new(CaptureCallbacks::new()),
        )
        .unwrap();
    // Let the tailer observe the first line.
    tokio::time::sleep(Duration::from_millis(500)).await;
    first.shutdown_all().await;
    assert!(handle.wait().await.is_none());
    let left_behind = load_record(&env.jobs_dir(), "crash").unwrap();
    assert_eq!(left_behind.status, JobStatus::Running);
    assert!(left_behind.read_position > 0, "first line should have been consumed");

    let second = Executor::from_config(config);
    let callbacks = CaptureCallbacks::new();
    let report = second.reconcile_orphans(&callbacks).await.unwrap();

    // The first line was consumed before the shutdown; its text survives.
    assert_eq!(
        report.get("crash"),
        Some(&JobOutcome::Failed {
            reason: "orphaned_interrupted".into(),
            partial: Some("progress".into()),
            exit_was_forced: false,
        })
    );
}

// ---------------------------------------------------------------------------
// Replay determinism
// ---------------------------------------------------------------------------

fn tail_through_cursor(path: &std::path::Path, handler: &mut dyn StreamHandler) {
    let mut cursor = TailCursor::new(path, 0);
    for event in cursor.scan().unwrap() {
        if let TailEvent::Event(value) = event {
            handler.on_event(&value);
        }
    }
}

#[test]
fn cursor_and_replay_scanner_agree() {
    let env = TestEnv::new();
    let path = env.dir.path().join("output.jsonl");
    let log = format!(
        "{}\n\nnot json at all\n{}\n{}\n{}\n",
        claude_assistant("one "),
        claude_assistant("two"),
        claude_result("error_max_turns", "", "s9"),
        claude_assistant("ignored"),
    );
    std::fs::write(&path, log).unwrap();

    let mut tailed = ClaudeStreamHandler::new();
    tail_through_cursor(&path, &mut tailed);
    let mut replayed = ClaudeStreamHandler::new();
    replay_log(&path, 0, &mut replayed).unwrap();

    assert_eq!(tailed.result(), replayed.result());
    assert_eq!(tailed.is_complete(), replayed.is_complete());
    assert_eq!(tailed.failure_reason(), replayed.failure_reason());

    let codex_path = env.dir.path().join("codex.jsonl");
    std::fs::write(
        &codex_path,
        lines(&[codex_message("a"), codex_message("b"), codex_turn_completed()]),
    )
    .unwrap();
    let mut tailed = CodexStreamHandler::new();
    tail_through_cursor(&codex_path, &mut tailed);
    let mut replayed = CodexStreamHandler::new();
    replay_log(&codex_path, 0, &mut replayed).unwrap();
    assert_eq!(tailed.result(), replayed.result());
    assert_eq!(replayed.result(), "a\n\nb");
}
