// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent, Role};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deterministic mock provider.  Echoes the last user message back as the
/// assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Events for one tool call: a start event followed by the arguments split
/// into two fragments, the way streaming backends deliver them.
pub fn tool_call_events(
    index: u32,
    id: impl Into<String>,
    name: impl Into<String>,
    args_json: &str,
) -> Vec<ResponseEvent> {
    let mid = args_json
        .char_indices()
        .map(|(i, _)| i)
        .nth(args_json.chars().count() / 2)
        .unwrap_or(args_json.len());
    let (head, tail) = args_json.split_at(mid);
    let mut events = vec![ResponseEvent::ToolCall {
        index,
        id: id.into(),
        name: name.into(),
    }];
    for part in [head, tail] {
        if !part.is_empty() {
            events.push(ResponseEvent::ToolCallArgsDelta {
                index,
                delta: part.to_string(),
            });
        }
    }
    events
}

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences – including tool calls – without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// Every `CompletionRequest` seen by this provider, in order.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ResponseEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: &str,
        final_text: impl Into<String>,
    ) -> Self {
        let mut round1 = tool_call_events(0, tool_id, tool_name, args_json);
        round1.push(ResponseEvent::Done);
        Self::new(vec![
            round1,
            vec![ResponseEvent::TextDelta(final_text.into()), ResponseEvent::Done],
        ])
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        lock(&self.requests).push(req);
        let events = {
            let mut scripts = lock(&self.scripts);
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{Message, ModelProvider};

    fn req() -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    async fn collect(p: &dyn ModelProvider) -> Vec<ResponseEvent> {
        let mut stream = p.complete(req()).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let events = collect(&MockProvider).await;
        assert_eq!(events[0], ResponseEvent::TextDelta("MOCK: hi".into()));
        assert_eq!(events.last(), Some(&ResponseEvent::Done));
    }

    #[tokio::test]
    async fn scripted_pops_in_order_then_falls_back() {
        let p = ScriptedMockProvider::new(vec![
            vec![ResponseEvent::TextDelta("one".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("two".into()), ResponseEvent::Done],
        ]);
        assert_eq!(collect(&p).await[0], ResponseEvent::TextDelta("one".into()));
        assert_eq!(collect(&p).await[0], ResponseEvent::TextDelta("two".into()));
        assert_eq!(
            collect(&p).await[0],
            ResponseEvent::TextDelta("[no more scripts]".into())
        );
        assert_eq!(p.call_count(), 3);
        assert!(p.last_request().is_some());
    }

    #[test]
    fn tool_call_events_split_args_into_fragments() {
        let events = tool_call_events(2, "c1", "bash", r#"{"command":"ls"}"#);
        assert!(matches!(&events[0], ResponseEvent::ToolCall { index: 2, name, .. } if name == "bash"));
        let joined: String = events
            .iter()
            .filter_map(|e| match e {
                ResponseEvent::ToolCallArgsDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(joined, r#"{"command":"ls"}"#);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn tool_call_events_without_args_has_no_delta() {
        let events = tool_call_events(0, "c1", "get_current_time", "");
        assert_eq!(events.len(), 1);
    }
}
