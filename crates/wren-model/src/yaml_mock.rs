// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model provider driven by a YAML rule file, so the binary can run whole
//! tool-calling turns without a real backend.
//!
//! ```yaml
//! responses:
//!   - match_type: contains       # contains | equals | starts_with | regex | default
//!     pattern: "ping"
//!     reply: "pong"
//!
//!   - match_type: contains
//!     pattern: "what time"
//!     tool_calls:
//!       - id: tc-1
//!         tool: get_current_time
//!         args: {}
//!     after_tool_reply: "Here is the time."
//!
//!   - match_type: default
//!     reply: "I understand your request."
//! ```
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{mock::tool_call_events, provider::ResponseStream, CompletionRequest, ResponseEvent, Role};

// ─── YAML schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MockConfig {
    pub responses: Vec<ResponseRule>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseRule {
    /// How to match the last user message.
    pub match_type: MatchType,
    /// Ignored for `default`.
    #[serde(default)]
    pub pattern: String,
    pub reply: Option<String>,
    /// Tool calls emitted in the first round.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDef>,
    /// Reply once tool results follow the user message.
    pub after_tool_reply: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Contains,
    Equals,
    StartsWith,
    Regex,
    Default,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDef {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

// ─── Provider ────────────────────────────────────────────────────────────────

pub struct YamlMockProvider {
    config: MockConfig,
    call_count: AtomicU32,
}

impl YamlMockProvider {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading mock responses file: {}", path.display()))?;
        Self::load(&text)
    }

    pub fn load(yaml: &str) -> anyhow::Result<Self> {
        let config: MockConfig =
            serde_yaml::from_str(yaml).context("parsing mock responses YAML")?;
        Ok(Self {
            config,
            call_count: AtomicU32::new(0),
        })
    }

    fn find_rule(&self, user_text: &str) -> Option<&ResponseRule> {
        let lower = user_text.to_lowercase();
        let mut default_rule = None;

        for rule in &self.config.responses {
            let pattern = rule.pattern.to_lowercase();
            let hit = match rule.match_type {
                MatchType::Default => {
                    default_rule = Some(rule);
                    false
                }
                MatchType::Contains => lower.contains(&pattern),
                MatchType::Equals => lower == pattern,
                MatchType::StartsWith => lower.starts_with(&pattern),
                MatchType::Regex => regex::Regex::new(&rule.pattern)
                    .map(|re| re.is_match(user_text))
                    .unwrap_or(false),
            };
            if hit {
                return Some(rule);
            }
        }

        default_rule
    }
}

#[async_trait]
impl crate::ModelProvider for YamlMockProvider {
    fn name(&self) -> &str {
        "yaml-mock"
    }
    fn model_name(&self) -> &str {
        "yaml-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let call_num = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;

        let last_user = req.messages.iter().rposition(|m| m.role == Role::User);
        let last_user_text = last_user
            .map(|i| req.messages[i].content.as_str())
            .unwrap_or("[no user message]");
        // Tool results after the latest user message mean this is the
        // follow-up round.
        let has_tool_results = last_user
            .map(|i| req.messages[i..].iter().any(|m| m.role == Role::Tool))
            .unwrap_or(false);

        debug!(call_num, has_tool_results, last_user = %last_user_text, "yaml mock complete()");

        let rule = self.find_rule(last_user_text);
        let events = if has_tool_results || req.tools.is_empty() {
            let text = rule
                .and_then(|r| r.after_tool_reply.as_deref().or(r.reply.as_deref()))
                .unwrap_or("[no after-tool reply configured]");
            text_events(text)
        } else {
            match rule {
                None => text_events("[no mock rule matched]"),
                Some(r) if r.tool_calls.is_empty() => {
                    text_events(r.reply.as_deref().unwrap_or("[no reply configured]"))
                }
                Some(r) => {
                    let mut events = Vec::new();
                    for (i, tc) in r.tool_calls.iter().enumerate() {
                        let args = if tc.args.is_null() {
                            "{}".to_string()
                        } else {
                            tc.args.to_string()
                        };
                        events.extend(tool_call_events(i as u32, &tc.id, &tc.tool, &args));
                    }
                    events.push(ResponseEvent::Done);
                    events
                }
            }
        };

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

fn text_events(text: &str) -> Vec<ResponseEvent> {
    vec![ResponseEvent::TextDelta(text.to_string()), ResponseEvent::Done]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
