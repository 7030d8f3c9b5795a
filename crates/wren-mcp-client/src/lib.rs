// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Connections to external MCP tool servers.
//!
//! [`McpManager`] owns one independent connection per configured server,
//! exposes the union of their tools and routes calls by tool name.
mod error;
mod http;
mod manager;
pub mod protocol;
mod stdio;
mod transport;
mod validate;

pub use error::McpError;
pub use http::HttpTransport;
pub use manager::{McpManager, ServerConnectionState, ServerStatus};
pub use protocol::{CallToolResult, ToolContent, ToolInfo};
pub use stdio::StdioTransport;
pub use transport::{Connector, DefaultConnector, McpTransport};
pub use validate::validate_arguments;
