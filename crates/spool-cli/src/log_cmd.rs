//! `spool log` command: show a job's logged events.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use spool_core::tailer::{TailCursor, TailEvent};
use spool_core::tracker::{JobPaths, load_record};

/// Run the log command.
pub fn run_log(jobs_dir: &Path, job_id: &str) -> Result<()> {
    let record =
        load_record(jobs_dir, job_id).with_context(|| format!("job {job_id} not found"))?;

    println!("Job: {} ({})", record.job_id, record.harness);
    println!("Status: {}", record.status);
    println!();

    let log_path = JobPaths::new(jobs_dir, job_id).log();
    let mut cursor = TailCursor::new(&log_path, 0);
    let events = cursor
        .scan()
        .with_context(|| format!("failed to read log {}", log_path.display()))?;

    let lines: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            TailEvent::Event(value) => Some(summarize_event(value)),
            TailEvent::RawLine(line) => Some(format!("raw: {}", truncate(line, 80))),
            TailEvent::Position(_) => None,
        })
        .collect();

    if lines.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!("Events ({}):", lines.len());
    for line in &lines {
        println!("  {line}");
    }
    if cursor.buffered_len() > 0 {
        println!("  ({} bytes of unterminated output)", cursor.buffered_len());
    }

    Ok(())
}

/// Generate a one-line summary of one event from any harness.
fn summarize_event(event: &Value) -> String {
    let event_type = event["type"].as_str().unwrap_or("unknown");
    let summary = match event_type {
        // claude
        "system" => event["subtype"].as_str().unwrap_or("").to_string(),
        "assistant" => summarize_claude_content(&event["message"]["content"]),
        "user" => "tool output".to_string(),
        "result" => {
            if let Some(status) = event["status"].as_str() {
                status.to_string()
            } else {
                let subtype = event["subtype"].as_str().unwrap_or("?");
                let result = event["result"].as_str().unwrap_or("");
                format!("{subtype} {}", truncate(result, 60))
            }
        }
        // codex
        "item.completed" | "item.started" => {
            let item_type = event["item"]["type"].as_str().unwrap_or("?");
            match event["item"]["text"].as_str() {
                Some(text) => format!("{item_type}: {}", truncate(text, 70)),
                None => item_type.to_string(),
            }
        }
        "turn.completed" => {
            let input = event["usage"]["input_tokens"].as_u64().unwrap_or(0);
            let output = event["usage"]["output_tokens"].as_u64().unwrap_or(0);
            format!("in={input} out={output}")
        }
        // gemini
        "message" => {
            let role = event["role"].as_str().unwrap_or("?");
            let content = event["content"].as_str().unwrap_or("");
            format!("[{role}] {}", truncate(content, 80))
        }
        "tool_use" => format!("call {}", event["tool_name"].as_str().unwrap_or("?")),
        "error" => truncate(event["message"].as_str().unwrap_or("unknown error"), 80),
        _ => truncate(&event.to_string(), 80),
    };

    if summary.is_empty() {
        event_type.to_string()
    } else {
        format!("{event_type}: {summary}")
    }
}

fn summarize_claude_content(content: &Value) -> String {
    let Some(blocks) = content.as_array() else {
        return String::new();
    };
    let parts: Vec<String> = blocks
        .iter()
        .filter_map(|block| match block["type"].as_str() {
            Some("text") => block["text"].as_str().map(|t| truncate(t, 70)),
            Some("tool_use") => Some(format!("call {}", block["name"].as_str().unwrap_or("?"))),
            _ => None,
        })
        .collect();
    parts.join(" | ")
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
