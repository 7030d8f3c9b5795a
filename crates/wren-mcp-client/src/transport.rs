// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use wren_config::{McpServerConfig, McpTransportConfig};

use crate::error::McpError;
use crate::http::HttpTransport;
use crate::protocol::{ListToolsResult, ToolInfo, PROTOCOL_VERSION};
use crate::stdio::StdioTransport;

/// Upper bound on `tools/list` pages followed from one server.
const MAX_TOOL_PAGES: usize = 64;

/// A request/response channel to one server.
///
/// Methods take `&self` so that several tool calls can be in flight on
/// the same connection.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// Send a notification; no response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Release the connection.  Must be safe to call more than once.
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens transports from server configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, server: &McpServerConfig) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// Spawns stdio servers and builds HTTP clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, server: &McpServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        match &server.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                let t = StdioTransport::spawn(&server.name, command, args, env)?;
                Ok(Arc::new(t))
            }
            McpTransportConfig::Http { url, headers } => {
                let t = HttpTransport::new(url, headers)?;
                Ok(Arc::new(t))
            }
        }
    }
}

/// Run the MCP initialize handshake and collect the server's tools.
pub(crate) async fn handshake(
    server: &str,
    transport: &dyn McpTransport,
) -> Result<Vec<ToolInfo>, McpError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "wren",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let init = transport.request("initialize", Some(params)).await?;
    debug!(
        server,
        protocol = init.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("?"),
        "mcp initialize ok"
    );
    transport.notify("notifications/initialized", None).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.take().map(|c| json!({ "cursor": c }));
        let page: ListToolsResult =
            serde_json::from_value(transport.request("tools/list", params).await?)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(c) => cursor = Some(c),
            None => return Ok(tools),
        }
    }
    Err(McpError::Protocol(format!(
        "tools/list did not finish after {MAX_TOOL_PAGES} pages"
    )))
}
