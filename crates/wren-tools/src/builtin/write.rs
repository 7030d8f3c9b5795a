// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::required_str;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file, creating parent directories as needed. Overwrites by \
         default; set append=true to append instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file to write" },
                "content": { "type": "string", "description": "Text to write" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let path = match required_str(call, "path") {
            Ok(p) => p,
            Err(out) => return out,
        };
        let content = match required_str(call, "content") {
            Ok(c) => c,
            Err(out) => return out,
        };
        let append = call.args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        debug!(path = %path, bytes = content.len(), append, "write_file tool");

        if let Some(parent) = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("mkdir error: {e}"));
            }
        }

        let result = if append {
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(mut f) => match f.write_all(content.as_bytes()).await {
                    Ok(()) => f.flush().await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(path, content).await
        };

        match result {
            Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "w1".into(),
            name: "write_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn writes_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/out.txt");
        let ctx = ToolContext::default();

        let out = WriteFileTool
            .execute(&call(json!({ "path": path, "content": "one" })), &ctx)
            .await;
        assert!(!out.is_error, "{}", out.content);
        WriteFileTool
            .execute(&call(json!({ "path": path, "content": "two", "append": true })), &ctx)
            .await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "onetwo");
    }

    #[tokio::test]
    async fn appends_are_visible_as_soon_as_the_call_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let ctx = ToolContext::default();

        let mut expected = String::new();
        for i in 0..20 {
            let line = format!("line {i}\n");
            let out = WriteFileTool
                .execute(&call(json!({ "path": path, "content": line, "append": true })), &ctx)
                .await;
            assert!(!out.is_error, "{}", out.content);
            expected.push_str(&line);
            assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let out = WriteFileTool
            .execute(&call(json!({ "path": "/tmp/x" })), &ToolContext::default())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("'content'"));
    }
}
