// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Return the current date and time in RFC 3339 format. Set utc=true for UTC, \
         otherwise local time is returned."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc": {
                    "type": "boolean",
                    "description": "Return UTC instead of local time"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let utc = call.args.get("utc").and_then(|v| v.as_bool()).unwrap_or(false);
        let now = if utc {
            chrono::Utc::now().to_rfc3339()
        } else {
            chrono::Local::now().to_rfc3339()
        };
        ToolOutput::ok(&call.id, now)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn returns_parseable_timestamp() {
        let call = ToolCall {
            id: "t".into(),
            name: "get_current_time".into(),
            args: json!({ "utc": true }),
        };
        let out = GetCurrentTimeTool.execute(&call, &ToolContext::default()).await;
        assert!(!out.is_error);
        assert!(chrono::DateTime::parse_from_rfc3339(&out.content).is_ok(), "{}", out.content);
    }
}
