// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use wren_tools::Disposition;

/// How a tool call ended, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    /// The tool ran (or was looked up) and failed.
    Error,
    /// The gate or a human refused the call; the tool never ran.
    Denied { reason: String },
}

/// Events emitted by the agent loop during a run.
/// Consumers (CLI, remote UI) subscribe to these to drive their output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    Token(String),
    /// Status label, from the backend or the loop itself
    Phase(String),
    ToolCallStart {
        call_id: String,
        name: String,
    },
    /// A fragment of a tool call's JSON arguments as it streams in
    ToolCallArgsDelta {
        call_id: String,
        delta: String,
    },
    /// A tool call finished.  `disposition` is for audit only and never
    /// reaches the model.
    ToolCallEnd {
        call_id: String,
        name: String,
        status: ToolCallStatus,
        output: String,
        disposition: Disposition,
    },
    /// A queued user message was taken up as a new turn
    QueuedMessage(String),
    /// The turn has made many tool calls; the UI may suggest planning
    AutoPlanSuggest { tool_calls: usize },
    /// The current turn is complete
    Done,
    /// Unrecoverable failure; no further events follow
    Error(String),
}

impl AgentEvent {
    /// True for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_with_snake_case_tags() {
        let ev = AgentEvent::ToolCallEnd {
            call_id: "c1".into(),
            name: "bash".into(),
            status: ToolCallStatus::Denied {
                reason: "denied by user".into(),
            },
            output: "Tool call denied".into(),
            disposition: Disposition::Denied,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "tool_call_end");
        assert_eq!(v["data"]["status"]["status"], "denied");
        assert_eq!(v["data"]["disposition"], "denied");

        let v = serde_json::to_value(AgentEvent::AutoPlanSuggest { tool_calls: 7 }).unwrap();
        assert_eq!(v["event"], "auto_plan_suggest");
        assert_eq!(v["data"]["tool_calls"], 7);
    }
}
