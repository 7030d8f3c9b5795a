// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::required_str;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Files larger than this are cut before line selection.
const READ_LIMIT: usize = 200_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Lines are prefixed with L<n>:. Use offset (1-based) and limit \
         to page through large files; default limit is 2000 lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file" },
                "offset": { "type": "integer", "description": "First line to return (1-based)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let path = match required_str(call, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(2000) as usize;

        debug!(path = %path, offset, limit, "read_file tool");

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        let capped = &bytes[..bytes.len().min(READ_LIMIT)];
        let text = String::from_utf8_lossy(capped);

        let start = offset.saturating_sub(1);
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let mut content = lines
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, line)| format!("L{}:{}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        let shown = limit.min(total.saturating_sub(start));
        if start + shown < total {
            content.push_str(&format!(
                "\n...[{} more lines, use offset={} to continue]",
                total - start - shown,
                start + shown + 1
            ));
        }
        if bytes.len() > READ_LIMIT {
            content.push_str(&format!("\n...[file truncated at {READ_LIMIT} bytes]"));
        }
        ToolOutput::ok(&call.id, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "r1".into(),
            name: "read_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn reads_with_line_numbers_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        let out = ReadFileTool
            .execute(
                &call(json!({ "path": path, "offset": 2, "limit": 2 })),
                &ToolContext::default(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.starts_with("L2:b\nL3:c"));
        assert!(out.content.contains("offset=4"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let out = ReadFileTool
            .execute(&call(json!({ "path": "/nonexistent/x" })), &ToolContext::default())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_path_names_the_parameter() {
        let out = ReadFileTool.execute(&call(json!({})), &ToolContext::default()).await;
        assert!(out.is_error);
        assert!(out.content.contains("'path'"));
    }
}
