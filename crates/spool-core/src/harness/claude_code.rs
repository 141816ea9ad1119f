//! Claude Code harness adapter.
//!
//! Runs `claude -p <prompt> --output-format stream-json --verbose` and
//! reduces its JSONL output: text blocks of `assistant` messages accumulate,
//! and the final `result` event carries completion, success, the
//! authoritative result text and a resumable session id.

use serde_json::Value;

use super::trait_def::{Harness, StreamHandler};
use super::types::{CommandSpec, JobRequest};

/// Harness adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Debug, Clone)]
pub struct ClaudeCodeAdapter {
    /// Path to the `claude` binary. Defaults to `"claude"` (found via `$PATH`).
    claude_binary_path: String,
}

impl ClaudeCodeAdapter {
    /// Create a new adapter that will look for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("claude")
    }

    /// Create a new adapter with a custom binary path.
    ///
    /// Useful for testing or when `claude` is installed in a non-standard
    /// location.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            claude_binary_path: path.into(),
        }
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn command(&self, request: &JobRequest) -> CommandSpec {
        CommandSpec::new(&self.claude_binary_path)
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .opt("--model", request.model.as_deref())
            .opt("--resume", request.resume_session_id.as_deref())
    }

    fn handler(&self) -> Box<dyn StreamHandler> {
        Box::new(ClaudeStreamHandler::new())
    }
}

// ---------------------------------------------------------------------------
// Stream handler
// ---------------------------------------------------------------------------

/// State machine for Claude Code's `stream-json` protocol.
#[derive(Debug, Default, Clone)]
pub struct ClaudeStreamHandler {
    chunks: Vec<String>,
    final_result: Option<String>,
    complete: bool,
    success: bool,
    session_id: Option<String>,
    failure_reason: Option<String>,
}

impl ClaudeStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_assistant(&mut self, event: &Value) {
        let Some(blocks) = event
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
        else {
            return;
        };

        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) != Some("text") {
                continue;
            }
            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                self.chunks.push(text.to_string());
            }
        }
    }

    fn on_result(&mut self, event: &Value) {
        let subtype = event.get("subtype").and_then(|s| s.as_str());
        let is_error = event
            .get("is_error")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);

        self.complete = true;
        self.success = subtype == Some("success") && !is_error;

        if let Some(result) = event.get("result").and_then(|r| r.as_str()) {
            self.final_result = Some(result.to_string());
        }
        if let Some(session) = event.get("session_id").and_then(|s| s.as_str()) {
            self.session_id = Some(session.to_string());
        }
        if !self.success {
            self.failure_reason = Some(format!("claude_result_{}", subtype.unwrap_or("error")));
        }
    }
}

impl StreamHandler for ClaudeStreamHandler {
    fn on_event(&mut self, event: &Value) {
        if self.complete {
            return;
        }
        match event.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => self.on_assistant(event),
            Some("result") => self.on_result(event),
            _ => {}
        }
    }

    fn result(&self) -> String {
        match &self.final_result {
            Some(result) => result.clone(),
            None => self.chunks.concat(),
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn is_success(&self) -> bool {
        self.success
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(handler: &mut ClaudeStreamHandler, lines: &[&str]) {
        for line in lines {
            let v: Value = serde_json::from_str(line).unwrap();
            handler.on_event(&v);
        }
    }

    #[test]
    fn result_event_overrides_text_and_sets_session() {
        let mut h = ClaudeStreamHandler::new();
        feed(
            &mut h,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
                r#"{"type":"result","subtype":"success","result":"Final","session_id":"s1"}"#,
            ],
        );
        assert_eq!(h.result(), "Final");
        assert!(h.is_complete());
        assert!(h.is_success());
        assert_eq!(h.session_id(), Some("s1"));
        assert_eq!(h.failure_reason(), None);
    }

    #[test]
    fn accumulates_only_text_blocks() {
        let mut h = ClaudeStreamHandler::new();
        feed(
            &mut h,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"a"},{"type":"tool_use","name":"Bash","input":{}}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"b"}]}}"#,
                r#"{"type":"user","message":{"content":[{"type":"text","text":"ignored"}]}}"#,
            ],
        );
        assert_eq!(h.result(), "ab");
        assert!(!h.is_complete());
        assert!(!h.is_success());
    }

    #[test]
    fn result_without_result_field_keeps_accumulated_text() {
        let mut h = ClaudeStreamHandler::new();
        feed(
            &mut h,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}"#,
                r#"{"type":"result","subtype":"success"}"#,
            ],
        );
        assert_eq!(h.result(), "partial");
        assert!(h.is_success());
        assert_eq!(h.session_id(), None);
    }

    #[test]
    fn error_subtype_sets_failure_reason() {
        let mut h = ClaudeStreamHandler::new();
        h.on_event(&json!({"type": "result", "subtype": "error_max_turns", "is_error": true}));
        assert!(h.is_complete());
        assert!(!h.is_success());
        assert_eq!(h.failure_reason(), Some("claude_result_error_max_turns"));
    }

    #[test]
    fn success_subtype_with_is_error_is_failure() {
        let mut h = ClaudeStreamHandler::new();
        h.on_event(&json!({"type": "result", "subtype": "success", "is_error": true}));
        assert!(!h.is_success());
        assert_eq!(h.failure_reason(), Some("claude_result_success"));
    }

    #[test]
    fn missing_subtype_reports_generic_error() {
        let mut h = ClaudeStreamHandler::new();
        h.on_event(&json!({"type": "result"}));
        assert_eq!(h.failure_reason(), Some("claude_result_error"));
    }

    #[test]
    fn events_after_completion_are_ignored() {
        let mut h = ClaudeStreamHandler::new();
        h.on_event(&json!({"type": "result", "subtype": "success", "result": "done"}));
        h.on_event(&json!({"type": "result", "subtype": "error"}));
        h.on_event(&json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "late"}]}}));
        assert!(h.is_complete());
        assert!(h.is_success());
        assert_eq!(h.result(), "done");
    }

    #[test]
    fn malformed_shapes_are_ignored() {
        let mut h = ClaudeStreamHandler::new();
        h.on_event(&json!({"type": "assistant"}));
        h.on_event(&json!({"type": "assistant", "message": {"content": "not an array"}}));
        h.on_event(&json!("bare string"));
        assert_eq!(h.result(), "");
        assert!(!h.is_complete());
    }

    #[test]
    fn command_includes_streaming_flags() {
        let adapter = ClaudeCodeAdapter::with_binary("/opt/claude");
        let mut req = JobRequest::new("j1", "claude", "fix it");
        req.model = Some("opus".to_string());
        req.resume_session_id = Some("s9".to_string());
        let cmd = adapter.command(&req);
        assert_eq!(cmd.program, "/opt/claude");
        assert_eq!(
            cmd.args,
            vec![
                "-p",
                "fix it",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "opus",
                "--resume",
                "s9",
            ]
        );
    }

    #[test]
    fn command_omits_resume_without_session() {
        let cmd = ClaudeCodeAdapter::new().command(&JobRequest::new("j1", "claude", "p"));
        assert_eq!(cmd.program, "claude");
        assert!(!cmd.args.iter().any(|a| a == "--resume"));
    }
}
