// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod approval_channel;
pub mod builtin;
pub mod detect;
pub mod gate;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod tier;
pub mod tool;

pub use approval_channel::{ApprovalPrompt, RemoteApprovalChannel};
pub use gate::{
    ApprovalDecision, ApprovalGate, ApprovalHandler, Authorization, Disposition, SafetyVerdict,
};
pub use policy::{decide, GateDecision};
pub use provider::ToolProvider;
pub use registry::ToolRegistry;
pub use tier::TierTable;
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput};
pub use wren_config::{ApprovalMode, ToolTier};
pub use wren_model::ToolSchema;
