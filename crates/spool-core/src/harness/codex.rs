//! Codex CLI harness adapter.
//!
//! Runs `codex exec --json --full-auto <prompt>`. The stream is a sequence
//! of thread/turn/item events; only completed `agent_message` items carry
//! result text, and `turn.completed` is the sole terminal event. Codex never
//! reports a failure reason of its own: a missing `turn.completed` is the
//! failure signal, surfaced by the executor's exit-code and timeout logic.

use serde_json::Value;

use super::trait_def::{Harness, StreamHandler};
use super::types::{CommandSpec, JobRequest};

/// Separator placed between agent messages in the result text.
const MESSAGE_SEPARATOR: &str = "\n\n";

/// Harness adapter for the Codex CLI.
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    codex_binary_path: String,
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self::with_binary("codex")
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            codex_binary_path: path.into(),
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn command(&self, request: &JobRequest) -> CommandSpec {
        // Session resumption is not supported; `resume_session_id` is ignored.
        CommandSpec::new(&self.codex_binary_path)
            .arg("exec")
            .arg("--json")
            .arg("--full-auto")
            .opt("--model", request.model.as_deref())
            .arg(&request.prompt)
    }

    fn handler(&self) -> Box<dyn StreamHandler> {
        Box::new(CodexStreamHandler::new())
    }
}

/// State machine for `codex exec --json` output.
#[derive(Debug, Default, Clone)]
pub struct CodexStreamHandler {
    messages: Vec<String>,
    complete: bool,
}

impl CodexStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamHandler for CodexStreamHandler {
    fn on_event(&mut self, event: &Value) {
        if self.complete {
            return;
        }
        match event.get("type").and_then(|t| t.as_str()) {
            Some("item.completed") => {
                let Some(item) = event.get("item") else {
                    return;
                };
                if item.get("type").and_then(|t| t.as_str()) != Some("agent_message") {
                    return;
                }
                if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    self.messages.push(text.to_string());
                }
            }
            Some("turn.completed") => self.complete = true,
            _ => {}
        }
    }

    fn result(&self) -> String {
        self.messages.join(MESSAGE_SEPARATOR)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn is_success(&self) -> bool {
        self.complete
    }

    fn session_id(&self) -> Option<&str> {
        None
    }

    fn failure_reason(&self) -> Option<&str> {
        None
    }
}
