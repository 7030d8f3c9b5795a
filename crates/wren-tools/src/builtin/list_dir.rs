// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::required_str;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const DEFAULT_LIMIT: usize = 200;

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of one directory, sorted. Directories have a trailing /."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" },
                "limit": { "type": "integer", "description": "Maximum entries (default 200)" }
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
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);

        debug!(path = %path, limit, "list_dir tool");

        let mut rd = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
        };
        let mut entries = Vec::new();
        loop {
            match rd.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    entries.push(name);
                }
                Ok(None) => break,
                Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
            }
        }
        entries.sort();

        let total = entries.len();
        entries.truncate(limit);
        let mut content = entries.join("\n");
        if total > limit {
            content.push_str(&format!("\n...[{} more entries]", total - limit));
        }
        if content.is_empty() {
            content = "(empty directory)".into();
        }
        ToolOutput::ok(&call.id, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let call = ToolCall {
            id: "l1".into(),
            name: "list_dir".into(),
            args: json!({ "path": dir.path() }),
        };
        let out = ListDirTool.execute(&call, &ToolContext::default()).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "a/\nb.txt");
    }
}
