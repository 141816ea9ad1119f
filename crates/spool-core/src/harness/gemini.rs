//! Gemini CLI harness adapter.
//!
//! Runs `gemini -p <prompt> --output-format stream-json --yolo`. Assistant
//! output arrives as `message` events (often as deltas) that are
//! concatenated verbatim; a `result` event ends the stream and its optional
//! `status` decides success.

use serde_json::Value;

use super::trait_def::{Harness, StreamHandler};
use super::types::{CommandSpec, JobRequest};

/// Harness adapter for the Gemini CLI.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    gemini_binary_path: String,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_binary("gemini")
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            gemini_binary_path: path.into(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn command(&self, request: &JobRequest) -> CommandSpec {
        CommandSpec::new(&self.gemini_binary_path)
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--yolo")
            .opt("--model", request.model.as_deref())
    }

    fn handler(&self) -> Box<dyn StreamHandler> {
        Box::new(GeminiStreamHandler::new())
    }
}

/// State machine for Gemini CLI's `stream-json` protocol.
#[derive(Debug, Default, Clone)]
pub struct GeminiStreamHandler {
    text: String,
    complete: bool,
    success: bool,
    failure_reason: Option<String>,
}

impl GeminiStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamHandler for GeminiStreamHandler {
    fn on_event(&mut self, event: &Value) {
        if self.complete {
            return;
        }
        match event.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                if event.get("role").and_then(|r| r.as_str()) != Some("assistant") {
                    return;
                }
                if let Some(content) = event.get("content").and_then(|c| c.as_str()) {
                    self.text.push_str(content);
                }
            }
            Some("result") => {
                self.complete = true;
                match event.get("status").and_then(|s| s.as_str()) {
                    Some(status) if status != "success" => {
                        self.success = false;
                        self.failure_reason = Some(format!("gemini_result_{status}"));
                    }
                    _ => self.success = true,
                }
            }
            _ => {}
        }
    }

    fn result(&self) -> String {
        self.text.clone()
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn is_success(&self) -> bool {
        self.success
    }

    fn session_id(&self) -> Option<&str> {
        None
    }

    fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}
