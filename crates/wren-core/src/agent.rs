// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wren_config::AgentConfig;
use wren_model::{
    CompletionRequest, Message, ModelProvider, ResponseEvent, Role, ToolCallRequest,
};
use wren_tools::{ApprovalHandler, Disposition, ToolCall, ToolContext, ToolOutput};

use crate::dispatcher::{ToolExecutor, ToolOutcome};
use crate::events::{AgentEvent, ToolCallStatus};
use crate::queue::MessageQueue;

/// How a single turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnEnd {
    Done,
    Cancelled,
    Failed,
}

/// What one streamed inference call produced.
struct Round {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Drives the model ↔ tool loop over a caller-owned conversation.
pub struct AgentLoop {
    model: Arc<dyn ModelProvider>,
    executor: Arc<dyn ToolExecutor>,
    config: AgentConfig,
    queue: MessageQueue,
    /// Passed to every tool call; its token is the loop's cancel signal.
    ctx: ToolContext,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        executor: Arc<dyn ToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            executor,
            config,
            queue: MessageQueue::default(),
            ctx: ToolContext::default(),
        }
    }

    /// Messages pushed to `queue` while a turn runs start new turns once
    /// it is done.
    pub fn with_queue(mut self, queue: MessageQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.ctx.cancel = cancel;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn ApprovalHandler>) -> Self {
        self.ctx.approver = Some(approver);
        self
    }

    /// Replace the whole tool context (depth, cancel token, approver).
    pub fn with_context(mut self, ctx: ToolContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Run on a background task and expose the events as a stream.
    ///
    /// The join handle yields the conversation once the stream has ended.
    pub fn spawn(
        self: Arc<Self>,
        mut conversation: Vec<Message>,
    ) -> (ReceiverStream<AgentEvent>, JoinHandle<Vec<Message>>) {
        let (tx, rx) = mpsc::channel(256);
        let handle = tokio::spawn(async move {
            self.run(&mut conversation, &tx).await;
            conversation
        });
        (ReceiverStream::new(rx), handle)
    }

    /// Run turns until the model stops calling tools and the message queue
    /// is empty, the loop is cancelled, or inference fails.
    ///
    /// Every turn ends with `Done`; inference failure ends the whole run
    /// with `Error` instead.
    pub async fn run(&self, conversation: &mut Vec<Message>, tx: &mpsc::Sender<AgentEvent>) {
        loop {
            match self.run_turn(conversation, tx).await {
                TurnEnd::Failed => return,
                TurnEnd::Cancelled => {
                    let _ = tx.send(AgentEvent::Done).await;
                    return;
                }
                TurnEnd::Done => {
                    let _ = tx.send(AgentEvent::Done).await;
                }
            }
            if self.ctx.cancel.is_cancelled() {
                return;
            }
            let Some(next) = self.queue.pop() else {
                return;
            };
            debug!(remaining = self.queue.len(), "starting queued turn");
            let _ = tx.send(AgentEvent::QueuedMessage(next.clone())).await;
            conversation.push(Message::user(next));
        }
    }

    async fn run_turn(
        &self,
        conversation: &mut Vec<Message>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> TurnEnd {
        let cancel = &self.ctx.cancel;
        let mut rounds = 0u32;
        let mut calls_made = 0usize;
        let mut narrations = 0usize;
        let mut plan_suggested = false;

        loop {
            if cancel.is_cancelled() {
                return TurnEnd::Cancelled;
            }
            truncate_oversized(conversation, self.config.tool_output_max_chars);

            let round = match self.stream_round(conversation, tx).await {
                Ok(Some(r)) => r,
                Ok(None) => return TurnEnd::Cancelled,
                Err(e) => {
                    warn!(error = %e, "inference failed");
                    let _ = tx.send(AgentEvent::Error(format!("{e:#}"))).await;
                    return TurnEnd::Failed;
                }
            };

            if round.tool_calls.is_empty() {
                if !round.text.is_empty() {
                    conversation.push(Message::assistant(round.text));
                }
                return TurnEnd::Done;
            }

            let calls = round.tool_calls;
            conversation.push(Message::assistant_with_tool_calls(round.text, calls.clone()));

            if cancel.is_cancelled() {
                self.skip_calls(&calls, conversation, tx).await;
                return TurnEnd::Cancelled;
            }

            let outcomes = self.execute_all(&calls).await;
            for (call, outcome) in calls.iter().zip(outcomes) {
                let _ = tx
                    .send(AgentEvent::ToolCallEnd {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        status: outcome.status,
                        output: outcome.output.content.clone(),
                        disposition: outcome.disposition,
                    })
                    .await;
                conversation.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    outcome.output.content,
                ));
            }
            rounds += 1;
            calls_made += calls.len();

            let threshold = self.config.auto_plan_threshold as usize;
            if threshold > 0 && !plan_suggested && calls_made >= threshold {
                plan_suggested = true;
                let _ = tx
                    .send(AgentEvent::AutoPlanSuggest {
                        tool_calls: calls_made,
                    })
                    .await;
            }

            let every = self.config.narration_every as usize;
            if every > 0 && calls_made / every > narrations {
                narrations = calls_made / every;
                if !cancel.is_cancelled() {
                    self.narrate(conversation, tx).await;
                }
            }

            let max = self.config.max_tool_rounds;
            if max > 0 && rounds >= max {
                warn!(rounds, "tool round limit reached; ending turn");
                let _ = tx
                    .send(AgentEvent::Phase(format!(
                        "stopped after {max} tool rounds"
                    )))
                    .await;
                return TurnEnd::Done;
            }
        }
    }

    /// One streamed inference call.  `Ok(None)` means cancelled mid-stream.
    async fn stream_round(
        &self,
        conversation: &[Message],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<Option<Round>> {
        let cancel = &self.ctx.cancel;
        let req = CompletionRequest {
            messages: conversation.to_vec(),
            tools: self.executor.schemas(),
            system_suffix: self.config.system_instruction.clone(),
            cancel: cancel.clone(),
        };
        let mut stream = self
            .model
            .complete(req)
            .await
            .context("model completion failed")?;

        let mut text = String::new();
        // Keyed by the call index from the backend; fragments for
        // different calls may interleave.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                ev = stream.next() => ev,
            };
            let Some(event) = next else { break };
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    text.push_str(&delta);
                    let _ = tx.send(AgentEvent::Token(delta)).await;
                }
                ResponseEvent::TextDelta(_) => {}
                ResponseEvent::ToolCall { index, id, name } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    if !ptc.announced && !ptc.name.is_empty() {
                        ptc.announced = true;
                        let call_id = ptc.call_id(index);
                        let _ = tx
                            .send(AgentEvent::ToolCallStart {
                                call_id: call_id.clone(),
                                name: ptc.name.clone(),
                            })
                            .await;
                        for delta in std::mem::take(&mut ptc.early_deltas) {
                            let _ = tx
                                .send(AgentEvent::ToolCallArgsDelta {
                                    call_id: call_id.clone(),
                                    delta,
                                })
                                .await;
                        }
                    }
                }
                ResponseEvent::ToolCallArgsDelta { index, delta } => {
                    let ptc = pending.entry(index).or_default();
                    ptc.args_buf.push_str(&delta);
                    // Held back until the call is announced with its real id.
                    if !ptc.announced {
                        ptc.early_deltas.push(delta);
                        continue;
                    }
                    let _ = tx
                        .send(AgentEvent::ToolCallArgsDelta {
                            call_id: ptc.call_id(index),
                            delta,
                        })
                        .await;
                }
                ResponseEvent::Phase(label) => {
                    let _ = tx.send(AgentEvent::Phase(label)).await;
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => bail!("model stream error: {e}"),
            }
        }

        // Calls with an empty name cannot be dispatched and are dropped;
        // storing them would corrupt the history sent on the next round.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let tool_calls = sorted
            .into_iter()
            .filter_map(|(idx, ptc)| {
                if ptc.name.is_empty() {
                    warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                    None
                } else {
                    Some(ptc.finish(idx))
                }
            })
            .collect();

        Ok(Some(Round { text, tool_calls }))
    }

    /// Execute every call of a round concurrently; results come back in
    /// request order.
    async fn execute_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolOutcome> {
        let tasks: Vec<JoinHandle<ToolOutcome>> = calls
            .iter()
            .map(|c| {
                let executor = Arc::clone(&self.executor);
                let ctx = self.ctx.clone();
                let call = ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    args: c.args.clone(),
                };
                tokio::spawn(async move { executor.execute(&call, &ctx).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (call, task) in calls.iter().zip(tasks) {
            let outcome = match task.await {
                Ok(o) => o,
                // The gate ran inside the task; a panic means the call was
                // authorized and the tool itself blew up.
                Err(e) => ToolOutcome {
                    output: ToolOutput::err(&call.id, format!("tool execution panicked: {e}")),
                    status: ToolCallStatus::Error,
                    disposition: Disposition::Auto,
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Answer calls that will not run because the loop was cancelled.
    async fn skip_calls(
        &self,
        calls: &[ToolCallRequest],
        conversation: &mut Vec<Message>,
        tx: &mpsc::Sender<AgentEvent>,
    ) {
        let reason = "cancelled before execution".to_string();
        for call in calls {
            let _ = tx
                .send(AgentEvent::ToolCallEnd {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    status: ToolCallStatus::Denied {
                        reason: reason.clone(),
                    },
                    output: reason.clone(),
                    disposition: Disposition::Denied,
                })
                .await;
            conversation.push(Message::tool_result(&call.id, &call.name, reason.clone()));
        }
    }

    /// Ask the model for a progress summary through an ephemeral prompt.
    /// The conversation is restored to its prior length on every path.
    async fn narrate(&self, conversation: &mut Vec<Message>, tx: &mpsc::Sender<AgentEvent>) {
        truncate_oversized(conversation, self.config.tool_output_max_chars);
        let before = conversation.len();
        conversation.push(Message::user(self.config.narration_prompt.clone()));
        let result = self.narration_call(conversation, tx).await;
        conversation.truncate(before);
        if let Err(e) = result {
            debug!(error = %e, "narration failed; continuing");
        }
    }

    async fn narration_call(
        &self,
        conversation: &[Message],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let cancel = &self.ctx.cancel;
        let _ = tx.send(AgentEvent::Phase("narration".into())).await;
        let req = CompletionRequest {
            messages: conversation.to_vec(),
            tools: Vec::new(),
            system_suffix: self.config.system_instruction.clone(),
            cancel: cancel.clone(),
        };
        let mut stream = self.model.complete(req).await?;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                ev = stream.next() => ev,
            };
            match next {
                None | Some(Ok(ResponseEvent::Done)) => return Ok(()),
                Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                    let _ = tx.send(AgentEvent::Token(delta)).await;
                }
                Some(Ok(ResponseEvent::Error(e))) => bail!("narration stream error: {e}"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            }
        }
    }
}

/// Marker that starts every truncation notice.
const TRUNCATED: &str = "[output truncated:";

/// Replace oversized tool results with a short notice.
fn truncate_oversized(conversation: &mut [Message], max_chars: usize) {
    if max_chars == 0 {
        return;
    }
    for msg in conversation.iter_mut().filter(|m| m.role == Role::Tool) {
        if msg.content.starts_with(TRUNCATED) {
            continue;
        }
        let chars = msg.content.chars().count();
        if chars > max_chars {
            let tool = msg.name.as_deref().unwrap_or("tool");
            debug!(tool_name = tool, chars, "truncating stored tool output");
            msg.content = format!(
                "{TRUNCATED} {tool} returned {chars} characters, more than the {max_chars}-character limit]"
            );
        }
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
    announced: bool,
    early_deltas: Vec<String>,
}

impl PendingToolCall {
    /// The id the call will carry; synthetic when the backend sent none.
    fn call_id(&self, index: u32) -> String {
        if self.id.is_empty() {
            format!("tc_synthetic_{index}")
        } else {
            self.id.clone()
        }
    }

    fn finish(self, index: u32) -> ToolCallRequest {
        let id = self.call_id(index);
        // Always resolve to a JSON object; backends reject anything else on
        // the next request.
        let args = if self.args_buf.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str::<serde_json::Value>(&self.args_buf) {
                Ok(v) if v.is_object() => v,
                Ok(_) | Err(_) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %id,
                        args_buf = %self.args_buf,
                        "tool call arguments are not a JSON object; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        ToolCallRequest {
            id,
            name: self.name,
            args,
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn truncation_names_tool_and_size_and_is_stable() {
        let mut conv = vec![
            Message::user("hi"),
            Message::tool_result("c1", "read_file", "x".repeat(50)),
            Message::tool_result("c2", "bash", "short"),
        ];
        truncate_oversized(&mut conv, 10);
        assert!(conv[1].content.contains("read_file"));
        assert!(conv[1].content.contains("50 characters"));
        assert_eq!(conv[2].content, "short");
        let once = conv[1].content.clone();
        truncate_oversized(&mut conv, 10);
        assert_eq!(conv[1].content, once);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        // 8 characters, 16 bytes.
        let accented = "é".repeat(8);
        let mut conv = vec![Message::tool_result("c1", "read_file", accented.clone())];
        truncate_oversized(&mut conv, 10);
        assert_eq!(conv[0].content, accented);

        conv[0].content = "é".repeat(11);
        truncate_oversized(&mut conv, 10);
        assert!(conv[0].content.contains("11 characters"));
    }

    #[test]
    fn pending_call_repairs_missing_pieces() {
        let tc = PendingToolCall {
            name: "bash".into(),
            args_buf: "{not json".into(),
            ..Default::default()
        }
        .finish(3);
        assert_eq!(tc.id, "tc_synthetic_3");
        assert_eq!(tc.args, serde_json::json!({}));
    }
}
