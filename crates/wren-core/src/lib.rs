// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod dispatcher;
mod events;
mod queue;
mod task_tool;

pub use agent::AgentLoop;
pub use dispatcher::{Dispatcher, ToolExecutor, ToolOutcome};
pub use events::{AgentEvent, ToolCallStatus};
pub use queue::MessageQueue;
pub use task_tool::SubAgentTool;
