//! Resumable tailing of an append-only NDJSON log file.
//!
//! [`TailCursor`] is the synchronous scan core: it reads only the bytes
//! appended since the previous scan, carries an unterminated trailing line
//! over to the next scan, and restarts from offset 0 when the file shrinks
//! (log rotation or truncation).
//!
//! [`LogTailer`] drives a cursor from a dedicated task. Filesystem change
//! notifications and a fallback polling timer both feed one debounced scan
//! trigger; notifications are not reliable everywhere, so polling always
//! runs. The task is the cursor's only owner, so scans never overlap.
//!
//! ```text
//!   notify watcher --+
//!                    +--> debounce --> scan --> TailEvent::{Event, RawLine, Position}
//!   poll interval ---+                  ^
//!   flush() -------------------------- -+  (reply after events are queued)
//! ```

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::TailerConfig;

/// One item produced by a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    /// A complete line that parsed as JSON.
    Event(Value),
    /// A complete, non-blank line that is not valid JSON.
    RawLine(String),
    /// The committed read offset changed. Everything before it has been
    /// emitted; it always sits on a line boundary.
    Position(u64),
}

/// Classify one complete log line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<TailEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => TailEvent::Event(value),
        Err(_) => TailEvent::RawLine(trimmed.to_string()),
    })
}

// ---------------------------------------------------------------------------
// TailCursor
// ---------------------------------------------------------------------------

/// Incremental reader over one log file.
#[derive(Debug)]
pub struct TailCursor {
    path: PathBuf,
    /// Bytes of the file consumed so far (including the buffered fragment).
    read_offset: u64,
    /// Unterminated trailing line carried to the next scan.
    buffer: Vec<u8>,
}

impl TailCursor {
    /// Create a cursor that starts reading at `position`.
    ///
    /// `position` must be a line boundary, as produced by
    /// [`TailCursor::position`].
    pub fn new(path: impl Into<PathBuf>, position: u64) -> Self {
        Self {
            path: path.into(),
            read_offset: position,
            buffer: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed offset: the start of the buffered fragment, or the read
    /// offset when nothing is buffered.
    pub fn position(&self) -> u64 {
        self.read_offset - self.buffer.len() as u64
    }

    /// Number of bytes held back as an incomplete line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Read everything appended since the last scan.
    ///
    /// A missing file scans as empty. A file shorter than the read offset
    /// is treated as rotated: the offset resets to 0 and the fragment
    /// buffer is discarded before reading.
    pub fn scan(&mut self) -> Result<Vec<TailEvent>> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to stat {}", self.path.display()));
            }
        };

        let before = self.position();
        let mut events = Vec::new();

        if size < self.read_offset {
            debug!(
                path = %self.path.display(),
                size,
                offset = self.read_offset,
                "log file shrank, restarting from offset 0"
            );
            self.read_offset = 0;
            self.buffer.clear();
        }

        if size > self.read_offset {
            let mut file = std::fs::File::open(&self.path)
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            file.seek(SeekFrom::Start(self.read_offset))
                .with_context(|| format!("failed to seek {}", self.path.display()))?;
            let mut chunk = Vec::with_capacity((size - self.read_offset) as usize);
            file.take(size - self.read_offset)
                .read_to_end(&mut chunk)
                .with_context(|| format!("failed to read {}", self.path.display()))?;

            self.read_offset += chunk.len() as u64;
            self.buffer.extend_from_slice(&chunk);
            self.drain_complete_lines(&mut events);
        }

        let after = self.position();
        if after != before {
            trace!(path = %self.path.display(), position = after, "read position advanced");
            events.push(TailEvent::Position(after));
        }
        Ok(events)
    }

    fn drain_complete_lines(&mut self, events: &mut Vec<TailEvent>) {
        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        for line in complete.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(line);
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LogTailer
// ---------------------------------------------------------------------------

enum TailerCommand {
    Flush(oneshot::Sender<()>),
    Stop,
}

/// Live tailer for one job's log file.
///
/// Lifecycle: `start` (initial scan + watch + poll) → repeated debounced
/// scans → `stop`. Dropping the tailer signals the task to stop but does
/// not wait for it.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    commands: Option<mpsc::UnboundedSender<TailerCommand>>,
    task: Option<JoinHandle<()>>,
}

impl LogTailer {
    /// Scan existing content, then keep tailing in the background.
    ///
    /// Events from the initial scan are queued on `events` before this
    /// returns.
    pub fn start(
        path: impl Into<PathBuf>,
        position: u64,
        config: TailerConfig,
        events: mpsc::UnboundedSender<TailEvent>,
    ) -> Self {
        let path = path.into();
        let mut cursor = TailCursor::new(path.clone(), position);
        scan_and_emit(&mut cursor, &events);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(tail_loop(cursor, config, events, cmd_rx));

        Self {
            path,
            commands: Some(cmd_tx),
            task: Some(task),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stopped(&self) -> bool {
        self.commands.is_none()
    }

    /// Run one more scan and wait until its events are queued.
    ///
    /// Returns `false` if the tailer is already stopped.
    pub async fn flush(&self) -> bool {
        let Some(commands) = &self.commands else {
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if commands.send(TailerCommand::Flush(reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.is_ok()
    }

    /// Stop watching and polling and wait for the tail task to exit.
    /// Idempotent.
    ///
    /// Once this returns no further events are queued, so the receiver can
    /// drain whatever is left and see the channel close.
    pub async fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(TailerCommand::Stop);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(path = %self.path.display(), error = %e, "tail task ended abnormally");
            }
            debug!(path = %self.path.display(), "tailer stopped");
        }
    }
}

impl Drop for LogTailer {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(TailerCommand::Stop);
        }
    }
}

fn scan_and_emit(cursor: &mut TailCursor, events: &mpsc::UnboundedSender<TailEvent>) {
    match cursor.scan() {
        Ok(batch) => {
            for event in batch {
                // A closed receiver means the job is finished; nothing to do.
                let _ = events.send(event);
            }
        }
        Err(e) => warn!(path = %cursor.path().display(), error = %e, "log scan failed"),
    }
}

/// Watch the log's parent directory so rotation (remove + recreate) is seen
/// as well as appends.
fn watch_file(path: &Path, wake: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
    let target = path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if event.paths.iter().any(|p| p == &target) {
                let _ = wake.send(());
            }
        }
    })
    .context("failed to create file watcher")?;

    let dir = path.parent().unwrap_or(path);
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    Ok(watcher)
}

async fn tail_loop(
    mut cursor: TailCursor,
    config: TailerConfig,
    events: mpsc::UnboundedSender<TailEvent>,
    mut commands: mpsc::UnboundedReceiver<TailerCommand>,
) {
    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
    // Held for the lifetime of the loop; dropping it ends the watch.
    let _watcher = match watch_file(cursor.path(), wake_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(path = %cursor.path().display(), error = %e, "file watch unavailable, polling only");
            None
        }
    };

    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial scan already ran.
    poll.tick().await;

    let debounce = tokio::time::sleep(config.debounce);
    tokio::pin!(debounce);
    let mut pending = false;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(TailerCommand::Flush(reply)) => {
                    pending = false;
                    scan_and_emit(&mut cursor, &events);
                    let _ = reply.send(());
                }
                Some(TailerCommand::Stop) | None => break,
            },
            Some(()) = wake_rx.recv() => {
                if !pending {
                    pending = true;
                    debounce.as_mut().reset(tokio::time::Instant::now() + config.debounce);
                }
            }
            _ = poll.tick() => {
                if !pending {
                    pending = true;
                    debounce.as_mut().reset(tokio::time::Instant::now() + config.debounce);
                }
            }
            () = &mut debounce, if pending => {
                pending = false;
                scan_and_emit(&mut cursor, &events);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn json_events(events: &[TailEvent]) -> Vec<Value> {
        events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Event(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parse_line_classifies() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(
            parse_line(r#"{"type":"x"}"#),
            Some(TailEvent::Event(serde_json::json!({"type": "x"})))
        );
        assert_eq!(
            parse_line("not json\r"),
            Some(TailEvent::RawLine("not json".to_string()))
        );
    }

    #[test]
    fn missing_file_scans_empty() {
        let tmp = TempDir::new().unwrap();
        let mut cursor = TailCursor::new(tmp.path().join("nope.jsonl"), 0);
        assert!(cursor.scan().unwrap().is_empty());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn reads_only_new_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"n\":1}\n");

        let mut cursor = TailCursor::new(&path, 0);
        let first = cursor.scan().unwrap();
        assert_eq!(json_events(&first), vec![serde_json::json!({"n": 1})]);
        assert_eq!(first.last(), Some(&TailEvent::Position(8)));

        append(&path, "{\"n\":2}\n");
        let second = cursor.scan().unwrap();
        assert_eq!(json_events(&second), vec![serde_json::json!({"n": 2})]);
        assert_eq!(cursor.position(), 16);

        assert!(cursor.scan().unwrap().is_empty(), "no new bytes, no events");
    }

    #[test]
    fn partial_line_is_buffered_until_terminated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"a\":1}\n{\"b\":");

        let mut cursor = TailCursor::new(&path, 0);
        let events = cursor.scan().unwrap();
        assert_eq!(json_events(&events), vec![serde_json::json!({"a": 1})]);
        assert_eq!(cursor.buffered_len(), 5);
        assert_eq!(cursor.position(), 8, "position stops at the fragment start");

        append(&path, "2}\n");
        let events = cursor.scan().unwrap();
        assert_eq!(json_events(&events), vec![serde_json::json!({"b": 2})]);
        assert_eq!(cursor.buffered_len(), 0);
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn fragment_without_newline_emits_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"never\":\"finished\"");

        let mut cursor = TailCursor::new(&path, 0);
        assert!(cursor.scan().unwrap().is_empty());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn malformed_lines_become_raw_events() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "garbage {{\n\n{\"ok\":true}\n");

        let mut cursor = TailCursor::new(&path, 0);
        let events = cursor.scan().unwrap();
        assert_eq!(events[0], TailEvent::RawLine("garbage {{".to_string()));
        assert_eq!(events[1], TailEvent::Event(serde_json::json!({"ok": true})));
        assert_eq!(events.len(), 3, "raw + event + position");
    }

    #[test]
    fn truncation_restarts_from_zero_without_duplicates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"first\":1}\n{\"second\":2}\n{\"partial\":");

        let mut cursor = TailCursor::new(&path, 0);
        let events = cursor.scan().unwrap();
        assert_eq!(json_events(&events).len(), 2);
        assert!(cursor.buffered_len() > 0);

        // Rotate: replace with shorter content.
        std::fs::write(&path, "{\"new\":1}\n").unwrap();
        let events = cursor.scan().unwrap();
        assert_eq!(json_events(&events), vec![serde_json::json!({"new": 1})]);
        assert!(
            !events.iter().any(|e| matches!(e, TailEvent::RawLine(_))),
            "old fragment must not leak into the new file: {events:?}"
        );
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn truncation_to_empty_reports_position_zero() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"a\":1}\n");

        let mut cursor = TailCursor::new(&path, 0);
        cursor.scan().unwrap();
        std::fs::write(&path, "").unwrap();
        assert_eq!(cursor.scan().unwrap(), vec![TailEvent::Position(0)]);
    }

    #[test]
    fn resumes_from_persisted_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"old\":1}\n{\"new\":2}\n");

        let mut cursor = TailCursor::new(&path, 10);
        let events = cursor.scan().unwrap();
        assert_eq!(json_events(&events), vec![serde_json::json!({"new": 2})]);
    }

    #[tokio::test]
    async fn live_tailer_delivers_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"n\":1}\n");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = TailerConfig {
            poll_interval: Duration::from_millis(20),
            debounce: Duration::from_millis(5),
        };
        let mut tailer = LogTailer::start(&path, 0, config, tx);

        // Initial scan is synchronous.
        assert_eq!(rx.try_recv().unwrap(), TailEvent::Event(serde_json::json!({"n": 1})));
        assert_eq!(rx.try_recv().unwrap(), TailEvent::Position(8));

        append(&path, "{\"n\":2}\n");
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("tailer should pick up the append")
            .unwrap();
        assert_eq!(next, TailEvent::Event(serde_json::json!({"n": 2})));

        tailer.stop().await;
        tailer.stop().await;
        assert!(tailer.is_stopped());
        assert!(!tailer.flush().await);
    }

    #[tokio::test]
    async fn stop_waits_for_the_task_to_exit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        append(&path, "{\"n\":1}\n");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = TailerConfig {
            poll_interval: Duration::from_millis(10),
            debounce: Duration::from_millis(1),
        };
        let mut tailer = LogTailer::start(&path, 0, config, tx);
        tailer.stop().await;

        append(&path, "{\"n\":2}\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut drained = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => drained.push(event),
                Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {
                    panic!("tail task still holds the sender after stop")
                }
            }
        }
        assert_eq!(json_events(&drained), vec![serde_json::json!({"n": 1})]);
    }

    #[tokio::test]
    async fn flush_queues_events_before_returning() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = TailerConfig {
            poll_interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(3600),
        };
        let tailer = LogTailer::start(&path, 0, config, tx);
        assert!(rx.try_recv().is_err());

        append(&path, "{\"late\":true}\n");
        assert!(tailer.flush().await);
        assert_eq!(
            rx.try_recv().unwrap(),
            TailEvent::Event(serde_json::json!({"late": true}))
        );
    }
}
