use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use wren_config::AgentConfig;
use wren_model::{Message, ModelProvider, Role};
use wren_tools::{Tool, ToolCall, ToolContext, ToolOutput};

use crate::agent::AgentLoop;
use crate::dispatcher::ToolExecutor;
use crate::events::AgentEvent;

/// Holds one fan-out slot for as long as a sub-agent runs.
struct FanoutSlot<'a>(&'a AtomicUsize);

impl<'a> FanoutSlot<'a> {
    fn acquire(active: &'a AtomicUsize, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| FanoutSlot(active))
    }
}

impl Drop for FanoutSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs a nested agent loop on a focused task and returns its final answer.
///
/// Nesting is bounded by `ToolContext::depth`; concurrency by a counter
/// shared by every sub-agent this tool starts.
pub struct SubAgentTool {
    model: Arc<dyn ModelProvider>,
    config: AgentConfig,
    max_depth: usize,
    max_fanout: usize,
    active: AtomicUsize,
    /// Set once the dispatcher that owns this tool exists.
    executor: OnceLock<Weak<dyn ToolExecutor>>,
}

impl SubAgentTool {
    pub fn new(model: Arc<dyn ModelProvider>, config: &AgentConfig) -> Self {
        // Nested loops report only their final answer.
        let mut sub = config.clone();
        sub.narration_every = 0;
        sub.auto_plan_threshold = 0;
        Self {
            model,
            max_depth: config.max_subagent_depth,
            max_fanout: config.max_subagent_fanout,
            config: sub,
            active: AtomicUsize::new(0),
            executor: OnceLock::new(),
        }
    }

    /// Give the tool the executor its sub-agents run tools through.  Only
    /// the first call has an effect.
    pub fn bind(&self, executor: &Arc<dyn ToolExecutor>) {
        let _ = self.executor.set(Arc::downgrade(executor));
    }

    /// Sub-agents currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text answer. \
         The sub-agent can call the same tools, subject to the same approval rules."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return ToolOutput::err(&call.id, "missing required parameter 'prompt'"),
        };
        if ctx.depth >= self.max_depth {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({}) reached", self.max_depth),
            );
        }
        let Some(_slot) = FanoutSlot::acquire(&self.active, self.max_fanout) else {
            return ToolOutput::err(
                &call.id,
                format!("too many sub-agents running (limit {})", self.max_fanout),
            );
        };
        let Some(executor) = self.executor.get().and_then(Weak::upgrade) else {
            return ToolOutput::err(&call.id, "sub-agent executor is not available");
        };

        let mut config = self.config.clone();
        if let Some(n) = call.args.get("max_rounds").and_then(Value::as_u64) {
            let n = u32::try_from(n).unwrap_or(u32::MAX).max(1);
            config.max_tool_rounds = match config.max_tool_rounds {
                0 => n,
                max => max.min(n),
            };
        }
        let sub_ctx = ctx.nested();
        debug!(depth = sub_ctx.depth, active = self.active(), "spawning sub-agent");

        let agent = AgentLoop::new(self.model.clone(), executor, config).with_context(sub_ctx);
        let mut conversation = vec![Message::user(prompt)];
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);

        let run = async {
            agent.run(&mut conversation, &tx).await;
            drop(tx);
        };
        let collect = async {
            let mut error = None;
            while let Some(ev) = rx.recv().await {
                if let AgentEvent::Error(e) = ev {
                    error = Some(e);
                }
            }
            error
        };
        let ((), error) = tokio::join!(run, collect);

        if let Some(e) = error {
            return ToolOutput::err(&call.id, format!("sub-agent error: {e}"));
        }
        let answer = conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone());
        match answer {
            Some(text) => ToolOutput::ok(&call.id, text),
            None => ToolOutput::ok(&call.id, "(sub-agent produced no text output)"),
        }
    }
}
