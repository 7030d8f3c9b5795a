// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use super::required_str;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from each end of oversized output.
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Runs a command with `bash -c`.
pub struct BashTool {
    pub timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command and return stdout + stderr.\n\
         Output is capped at ~20 KB; when larger, the first and last 100 lines are kept.\n\
         Prefer non-interactive commands. Use read_file/write_file for file contents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let command = match required_str(call, "command") {
            Ok(c) => c,
            Err(out) => return out,
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        // No stdin, and the child is killed if this future is dropped on
        // timeout or cancellation.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // New session: the child has no controlling terminal to scribble on.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }

        let run = tokio::time::timeout(Duration::from_secs(timeout), cmd.output());
        let result = tokio::select! {
            r = run => r,
            _ = ctx.cancel.cancelled() => {
                return ToolOutput::err(&call.id, "cancelled");
            }
        };

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }

                let code = output.status.code().unwrap_or(-1);
                match code {
                    0 if content.is_empty() => ToolOutput::ok(&call.id, "[exit 0]"),
                    0 => ToolOutput::ok(&call.id, content),
                    // grep/test convention: 1 means "nothing found", not failure
                    1 => ToolOutput::ok(&call.id, format!("[exit 1]\n{content}").trim_end().to_string()),
                    _ => ToolOutput::err(&call.id, format!("[exit {code}]\n{content}")),
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

/// Largest char boundary in `s` that is `<= idx`.
fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Cap `s` at roughly `OUTPUT_LIMIT_BYTES`, keeping the first `HEAD_LINES`
/// and last `TAIL_LINES` lines with an omission marker between them.
/// Output made of a few very long lines is cut by bytes instead.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        let half = OUTPUT_LIMIT_BYTES / 2;
        let head = &s[..floor_boundary(s, half)];
        let tail_start = floor_boundary(s, s.len() - half);
        let tail = &s[tail_start..];
        let omitted = s.len().saturating_sub(head.len() + tail.len());
        return format!("{head}\n...[{omitted} bytes omitted]...\n{tail}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());

    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "bash".into(),
            args,
        }
    }

    async fn run(args: Value) -> ToolOutput {
        BashTool::default().execute(&call(args), &ToolContext::default()).await
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let out = run(json!({ "command": "echo hello" })).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content.trim(), "hello");
    }

    #[tokio::test]
    async fn stdout_and_stderr_both_captured() {
        let out = run(json!({ "command": "echo out && echo err >&2" })).await;
        assert!(out.content.contains("out"));
        assert!(out.content.contains("[stderr]\nerr"));
    }

    #[tokio::test]
    async fn workdir_changes_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(json!({ "command": "pwd", "workdir": dir.path() })).await;
        assert!(!out.is_error);
        let name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(out.content.contains(&name), "{}", out.content);
    }

    #[tokio::test]
    async fn exit_1_is_not_error_but_includes_code() {
        let out = run(json!({ "command": "exit 1" })).await;
        assert!(!out.is_error);
        assert!(out.content.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn exit_2_is_error() {
        let out = run(json!({ "command": "exit 2" })).await;
        assert!(out.is_error);
        assert!(out.content.contains("[exit 2]"));
    }

    #[tokio::test]
    async fn timeout_is_error() {
        let out = run(json!({ "command": "sleep 5", "timeout_secs": 1 })).await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_command() {
        let cancel = CancellationToken::new();
        let ctx = ToolContext {
            cancel: cancel.clone(),
            ..ToolContext::default()
        };
        cancel.cancel();
        let out = BashTool::default()
            .execute(&call(json!({ "command": "sleep 5" })), &ctx)
            .await;
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[tokio::test]
    async fn missing_command_argument_is_error() {
        let out = run(json!({})).await;
        assert!(out.is_error);
        assert!(out.content.contains("'command'"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(head_tail_truncate("abc"), "abc");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let text: String = (0..5000).map(|i| format!("line {i}\n")).collect();
        let out = head_tail_truncate(&text);
        assert!(out.len() < text.len());
        assert!(out.starts_with("line 0\n"));
        assert!(out.trim_end().ends_with("line 4999"));
        assert!(out.contains("lines / ~"));
    }
}
