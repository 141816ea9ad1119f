//! The `Harness` and `StreamHandler` traits -- the adapter interface for
//! agent runtimes.
//!
//! Each concrete harness (Claude Code, Codex CLI, Gemini CLI) implements
//! both. The traits are object-safe so they can be stored as
//! `Box<dyn Harness>` in the [`super::HarnessRegistry`] and as
//! `Box<dyn StreamHandler>` inside a running job.

use serde_json::Value;

use super::types::{CommandSpec, JobRequest};

/// Reduces one harness's JSON event stream to a final result.
///
/// Implementations are pure state machines: no I/O, no clocks. Once
/// [`is_complete`](Self::is_complete) returns `true` it stays `true` and
/// further events are ignored.
pub trait StreamHandler: Send {
    /// Feed one parsed JSON event.
    fn on_event(&mut self, event: &Value);

    /// The result text: the terminal override when one was reported,
    /// otherwise everything accumulated so far.
    fn result(&self) -> String;

    /// Whether the harness's terminal event has been observed.
    fn is_complete(&self) -> bool;

    /// Whether the terminal event reported success. Always `false` before
    /// completion.
    fn is_success(&self) -> bool;

    /// Resumable session token, for harnesses that support resumption.
    fn session_id(&self) -> Option<&str>;

    /// Harness-specific failure reason from an unsuccessful terminal event.
    fn failure_reason(&self) -> Option<&str>;
}

/// Adapter interface for an agent CLI.
///
/// Implementors know how to invoke a specific agent binary in its
/// non-interactive streaming mode and how to build a fresh
/// [`StreamHandler`] for its output protocol.
pub trait Harness: Send + Sync {
    /// Name for this harness (e.g. "claude").
    fn name(&self) -> &str;

    /// Build the subprocess invocation for a request.
    ///
    /// The command must run non-interactively, stream newline-delimited
    /// JSON to stdout, and never read stdin.
    fn command(&self, request: &JobRequest) -> CommandSpec;

    /// Create a fresh stream handler for one job.
    fn handler(&self) -> Box<dyn StreamHandler>;
}

// Compile-time assertion: both traits must be object-safe.
const _: () = {
    fn _assert_harness_object_safe(_: &dyn Harness) {}
    fn _assert_handler_object_safe(_: &dyn StreamHandler) {}
};
