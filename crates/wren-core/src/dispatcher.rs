// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! One call interface over every tool source, gated by the approval gate.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use wren_tools::{
    ApprovalGate, Disposition, SafetyVerdict, ToolCall, ToolContext, ToolOutput, ToolProvider,
    ToolSchema,
};

use crate::events::ToolCallStatus;

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// What the model gets to see.
    pub output: ToolOutput,
    pub status: ToolCallStatus,
    /// Audit record; kept out of the conversation.
    pub disposition: Disposition,
}

/// The capability the agent loop uses to run tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas the model may call.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Authorize and run one call.  Never panics on tool failure; errors
    /// come back inside the outcome.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome;
}

/// Routes calls to the first provider that claims the tool name.
pub struct Dispatcher {
    gate: Arc<ApprovalGate>,
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl Dispatcher {
    pub fn new(gate: Arc<ApprovalGate>) -> Self {
        Self {
            gate,
            providers: Vec::new(),
        }
    }

    /// Add a provider.  Earlier providers win name clashes.
    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    /// Preview the gate's verdict for a call without running it.
    pub async fn check(&self, tool: &str, args: &Value) -> Option<SafetyVerdict> {
        self.gate.check(tool, args).await
    }

    fn provider_for(&self, tool: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers.iter().find(|p| p.has_tool(tool))
    }
}

#[async_trait]
impl ToolExecutor for Dispatcher {
    fn schemas(&self) -> Vec<ToolSchema> {
        let mut seen = HashSet::new();
        self.providers
            .iter()
            .flat_map(|p| p.tool_schemas())
            .filter(|s| seen.insert(s.name.clone()))
            .collect()
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        let Some(provider) = self.provider_for(&call.name) else {
            warn!(tool_name = %call.name, "model called an unknown tool");
            return ToolOutcome {
                output: ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
                status: ToolCallStatus::Error,
                disposition: Disposition::HardDenied,
            };
        };

        let auth = self
            .gate
            .authorize(&call.name, &call.args, ctx.approver.as_deref(), &ctx.cancel)
            .await;
        if let Some(reason) = auth.denial_reason() {
            debug!(tool_name = %call.name, disposition = %auth.disposition, %reason, "tool call refused");
            return ToolOutcome {
                output: ToolOutput::err(&call.id, format!("Tool call denied: {reason}")),
                status: ToolCallStatus::Denied { reason },
                disposition: auth.disposition,
            };
        }

        debug!(
            tool_name = %call.name,
            provider = provider.provider_name(),
            disposition = %auth.disposition,
            "executing tool"
        );
        let output = provider.call_tool(call, ctx).await;
        let status = if output.is_error {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Ok
        };
        ToolOutcome {
            output,
            status,
            disposition: auth.disposition,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use wren_tools::{
        ApprovalDecision, ApprovalHandler, ApprovalMode, TierTable, Tool, ToolRegistry, ToolTier,
    };

    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            "pretend writer"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("wrote {}", call.args["path"]))
        }
    }

    struct Counting {
        answer: ApprovalDecision,
        asked: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalHandler for Counting {
        async fn decide(&self, _verdict: &SafetyVerdict) -> ApprovalDecision {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn dispatcher(mode: ApprovalMode) -> Dispatcher {
        let mut reg = ToolRegistry::default();
        reg.register(Echo);
        let gate = ApprovalGate::new(
            mode,
            HashSet::new(),
            HashSet::new(),
            TierTable::new(Default::default(), ToolTier::Execute),
        );
        Dispatcher::new(Arc::new(gate)).with_provider(Arc::new(reg))
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            args: json!({ "path": "notes.txt" }),
        }
    }

    fn ctx_with(handler: Arc<Counting>) -> ToolContext {
        ToolContext {
            approver: Some(handler as Arc<dyn ApprovalHandler>),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_without_prompting() {
        let handler = Arc::new(Counting {
            answer: ApprovalDecision::ApproveOnce,
            asked: AtomicUsize::new(0),
        });
        let out = dispatcher(ApprovalMode::Ask)
            .execute(&call("nope"), &ctx_with(handler.clone()))
            .await;
        assert_eq!(out.status, ToolCallStatus::Error);
        assert!(out.output.content.contains("unknown tool: nope"));
        assert_eq!(handler.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approved_call_runs_and_records_disposition() {
        let handler = Arc::new(Counting {
            answer: ApprovalDecision::ApproveOnce,
            asked: AtomicUsize::new(0),
        });
        let out = dispatcher(ApprovalMode::AskForWrites)
            .execute(&call("write_file"), &ctx_with(handler.clone()))
            .await;
        assert_eq!(out.status, ToolCallStatus::Ok);
        assert_eq!(out.disposition, Disposition::AllowedOnce);
        assert_eq!(out.output.content, "wrote \"notes.txt\"");
        assert_eq!(handler.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_is_distinct_from_failure() {
        let handler = Arc::new(Counting {
            answer: ApprovalDecision::Deny,
            asked: AtomicUsize::new(0),
        });
        let out = dispatcher(ApprovalMode::AskForWrites)
            .execute(&call("write_file"), &ctx_with(handler))
            .await;
        assert!(matches!(out.status, ToolCallStatus::Denied { .. }));
        assert_eq!(out.disposition, Disposition::Denied);
        assert!(out.output.is_error);
        assert!(out.output.content.starts_with("Tool call denied"));
    }

    #[tokio::test]
    async fn auto_mode_needs_no_handler() {
        let out = dispatcher(ApprovalMode::Auto)
            .execute(&call("write_file"), &ToolContext::default())
            .await;
        assert_eq!(out.status, ToolCallStatus::Ok);
        assert_eq!(out.disposition, Disposition::Auto);
    }

    #[tokio::test]
    async fn schemas_come_from_every_provider() {
        let d = dispatcher(ApprovalMode::Auto);
        let names: Vec<String> = d.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["write_file".to_string()]);
    }
}
