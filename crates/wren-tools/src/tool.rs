// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::gate::ApprovalHandler;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// The tool failed non-fatally; `content` holds the error message.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Per-invocation context handed down the call chain.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Nesting level of the agent loop that issued the call; 0 at the top.
    pub depth: usize,
    /// Cooperative cancellation for the whole turn.
    pub cancel: CancellationToken,
    /// Human-decision capability used when the gate asks.
    pub approver: Option<Arc<dyn ApprovalHandler>>,
}

impl ToolContext {
    /// Context for a nested agent one level below this one.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            cancel: self.cancel.child_token(),
            approver: self.approver.clone(),
        }
    }
}

/// Trait that every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}
