//! Crash-resilient execution of streaming LLM agent harnesses.
//!
//! A job runs an agent CLI (`claude`, `codex`, `gemini`) with its stdout
//! redirected into a per-job log file. The coordinator tails that file,
//! reduces the harness's JSON stream into a result, and records progress in
//! a per-job status file so that jobs orphaned by a coordinator crash can be
//! reconciled on the next start.

pub mod config;
pub mod executor;
pub mod harness;
pub mod tailer;
pub mod tracker;

pub use config::{ExecutorConfig, TailerConfig};
pub use executor::{
    ExecutionHandle, Executor, ExecutorError, JobCallbacks, JobOutcome, ReconcileReport,
};
pub use harness::{Harness, HarnessRegistry, JobRequest, StreamHandler};
pub use tracker::{JobStatus, JobTracker, StatusRecord};
