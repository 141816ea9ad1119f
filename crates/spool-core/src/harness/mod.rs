//! Harness adapters for LLM coding agents.
//!
//! This module defines the [`Harness`] trait that every agent adapter
//! implements, the [`StreamHandler`] trait that reduces a harness's JSON
//! event stream to a result, and the [`HarnessRegistry`] for runtime lookup.
//!
//! # Architecture
//!
//! ```text
//! Executor
//!     |
//!     v
//! HarnessRegistry --resolve("codex")--> &dyn Harness
//!     |                                     |
//!     |   command(request) -----------------+--> CommandSpec { program, args }
//!     |   handler() ------------------------+--> Box<dyn StreamHandler>
//!     |                                              |
//!     |   on_event(json) for every log line ---------+
//!     |   is_complete() / result() / session_id() / failure_reason()
//! ```
//!
//! Each handler is an independent state machine; they share the trait and
//! nothing else.

pub mod claude_code;
pub mod codex;
pub mod gemini;
pub mod registry;
pub mod trait_def;
pub mod types;

// Re-export the primary public API at the module level.
pub use claude_code::{ClaudeCodeAdapter, ClaudeStreamHandler};
pub use codex::{CodexAdapter, CodexStreamHandler};
pub use gemini::{GeminiAdapter, GeminiStreamHandler};
pub use registry::HarnessRegistry;
pub use trait_def::{Harness, StreamHandler};
pub use types::{CommandSpec, JobRequest};

/// Return the event-type label used for the status record's counters.
///
/// This is the JSON `type` field when it is a string and `"unknown"`
/// otherwise.
pub fn event_type_label(event: &serde_json::Value) -> &str {
    event
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown")
}
