// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Connection lifecycle for every configured external tool server.
//!
//! Each server has its own slot with an independent state machine
//! (`disconnected -> connecting -> connected | error`).  A failing server
//! never affects the others; only caller cancellation aborts startup.
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wren_config::{McpConfig, McpServerConfig};
use wren_tools::{ToolCall, ToolContext, ToolOutput, ToolProvider, ToolSchema};

use crate::error::McpError;
use crate::protocol::{CallToolResult, ToolInfo};
use crate::transport::{handshake, Connector, DefaultConnector, McpTransport};
use crate::validate::validate_arguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Connecting => "connecting",
            ServerStatus::Connected => "connected",
            ServerStatus::Error => "error",
        })
    }
}

/// Snapshot of one server's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConnectionState {
    pub name: String,
    pub status: ServerStatus,
    /// Tools discovered on the last successful connect.
    pub tools: Vec<ToolInfo>,
    pub last_error: Option<String>,
}

struct ServerSlot {
    config: McpServerConfig,
    state: RwLock<ServerConnectionState>,
    /// Live transport.  Held for the whole of a connect or close so that
    /// lifecycle operations on one server are serialised.
    transport: Mutex<Option<Arc<dyn McpTransport>>>,
}

impl ServerSlot {
    fn new(config: McpServerConfig) -> Self {
        let state = ServerConnectionState {
            name: config.name.clone(),
            status: ServerStatus::Disconnected,
            tools: Vec::new(),
            last_error: None,
        };
        Self {
            config,
            state: RwLock::new(state),
            transport: Mutex::new(None),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn snapshot(&self) -> ServerConnectionState {
        self.state.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set(&self, status: ServerStatus, tools: Vec<ToolInfo>, last_error: Option<String>) {
        let mut st = self.state.write().unwrap_or_else(|p| p.into_inner());
        st.status = status;
        st.tools = tools;
        st.last_error = last_error;
    }

    fn offers(&self, tool: &str) -> bool {
        let st = self.state.read().unwrap_or_else(|p| p.into_inner());
        st.status == ServerStatus::Connected && st.tools.iter().any(|t| t.name == tool)
    }

    /// Take the transport out and close it.  The state is updated before
    /// the close is awaited.
    async fn close(&self) -> Result<(), McpError> {
        let transport = self.transport.lock().await.take();
        self.set(ServerStatus::Disconnected, Vec::new(), None);
        match transport {
            Some(t) => t.close().await,
            None => Ok(()),
        }
    }
}

pub struct McpManager {
    servers: Vec<ServerSlot>,
    connector: Arc<dyn Connector>,
    shutdown_timeout: Duration,
}

impl McpManager {
    /// Manager for the enabled servers in `cfg`, using real transports.
    pub fn new(cfg: &McpConfig) -> Self {
        Self::with_connector(cfg, Arc::new(DefaultConnector))
    }

    pub fn with_connector(cfg: &McpConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            servers: cfg.enabled_servers().cloned().map(ServerSlot::new).collect(),
            connector,
            shutdown_timeout: Duration::from_secs(cfg.shutdown_timeout_secs),
        }
    }

    fn slot(&self, name: &str) -> Result<&ServerSlot, McpError> {
        self.servers
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))
    }

    /// Connect every server concurrently.
    ///
    /// Individual failures are recorded in that server's state.  The only
    /// error returned is cancellation (or an interrupt), which aborts the
    /// whole startup.
    pub async fn connect_all(&self, cancel: &CancellationToken) -> Result<(), McpError> {
        let results = join_all(self.servers.iter().map(|s| self.connect_slot(s, cancel))).await;
        self.warn_duplicate_tools();
        match results.into_iter().find_map(Result::err) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tear down and re-establish one server's connection.
    pub async fn reconnect(&self, name: &str, cancel: &CancellationToken) -> Result<(), McpError> {
        let slot = self.slot(name)?;
        self.connect_slot(slot, cancel).await?;
        self.warn_duplicate_tools();
        Ok(())
    }

    /// Close one server's connection, bounded by the shutdown timeout.
    pub async fn disconnect(&self, name: &str) -> Result<(), McpError> {
        let slot = self.slot(name)?;
        match tokio::time::timeout(self.shutdown_timeout, slot.close()).await {
            Ok(r) => r,
            Err(_) => {
                warn!(server = name, "disconnect timed out; abandoning connection");
                Ok(())
            }
        }
    }

    async fn connect_slot(
        &self,
        slot: &ServerSlot,
        cancel: &CancellationToken,
    ) -> Result<(), McpError> {
        let name = slot.name();
        let mut current = tokio::select! {
            guard = slot.transport.lock() => guard,
            _ = cancel.cancelled() => return Err(McpError::Cancelled),
        };
        if let Some(old) = current.take() {
            if let Err(e) = old.close().await {
                debug!(server = name, error = %e, "closing previous connection failed");
            }
        }
        slot.set(ServerStatus::Connecting, Vec::new(), None);
        info!(server = name, "connecting to mcp server");

        // Whatever the connector hands back is recorded here so that a
        // timeout or cancellation mid-handshake can still close it.
        let acquired: StdMutex<Option<Arc<dyn McpTransport>>> = StdMutex::new(None);
        let secs = slot.config.timeout_secs;
        let attempt = async {
            let transport = self.connector.open(&slot.config).await?;
            *acquired.lock().unwrap_or_else(|p| p.into_inner()) = Some(transport.clone());
            let tools = handshake(name, transport.as_ref()).await?;
            Ok::<_, McpError>((transport, tools))
        };
        let outcome = tokio::select! {
            r = tokio::time::timeout(Duration::from_secs(secs), attempt) => {
                r.unwrap_or(Err(McpError::Timeout(secs)))
            }
            _ = cancel.cancelled() => Err(McpError::Cancelled),
        };

        match outcome {
            Ok((transport, tools)) => {
                info!(server = name, tools = tools.len(), "mcp server connected");
                *current = Some(transport);
                slot.set(ServerStatus::Connected, tools, None);
                Ok(())
            }
            Err(e) => {
                let partial = acquired.into_inner().unwrap_or_else(|p| p.into_inner());
                if let Some(t) = partial {
                    match tokio::time::timeout(self.shutdown_timeout, t.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(ce)) => {
                            debug!(server = name, error = %ce, "closing partial connection failed")
                        }
                        Err(_) => debug!(server = name, "closing partial connection timed out"),
                    }
                }
                if e.is_cancelled() || e.is_interrupted() {
                    debug!(server = name, error = %e, "connection attempt aborted");
                    slot.set(ServerStatus::Disconnected, Vec::new(), None);
                    return Err(e);
                }
                if e.is_protocol() {
                    warn!(server = name, error = %e, "mcp server failed to connect");
                } else {
                    error!(server = name, error = ?e, "mcp server failed to connect");
                }
                slot.set(ServerStatus::Error, Vec::new(), Some(e.to_string()));
                Ok(())
            }
        }
    }

    fn warn_duplicate_tools(&self) {
        let mut seen = HashSet::new();
        for slot in &self.servers {
            for tool in slot.snapshot().tools {
                if !seen.insert(tool.name.clone()) {
                    warn!(
                        server = slot.name(),
                        tool = %tool.name,
                        "tool name already offered by an earlier server; ignoring this one"
                    );
                }
            }
        }
    }

    /// Close every connection, bounded by the shutdown timeout.
    ///
    /// Teardown errors are logged and ignored.  An interrupt seen while
    /// closing is returned, but only after every connection has had its
    /// close attempt.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let closes = join_all(self.servers.iter().map(|s| s.close()));
        let results = match tokio::time::timeout(self.shutdown_timeout, closes).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    timeout_secs = self.shutdown_timeout.as_secs_f64(),
                    "mcp shutdown timed out; abandoning remaining connections"
                );
                for slot in &self.servers {
                    slot.set(ServerStatus::Disconnected, Vec::new(), None);
                }
                return Ok(());
            }
        };

        let mut interrupted = false;
        for (slot, result) in self.servers.iter().zip(results) {
            match result {
                Ok(()) => debug!(server = slot.name(), "mcp connection closed"),
                Err(e) if e.is_interrupted() => interrupted = true,
                Err(e) => debug!(server = slot.name(), error = %e, "mcp teardown error ignored"),
            }
        }
        if interrupted {
            Err(McpError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Per-server state in configuration order.
    pub fn states(&self) -> Vec<ServerConnectionState> {
        self.servers.iter().map(ServerSlot::snapshot).collect()
    }

    pub fn state(&self, name: &str) -> Option<ServerConnectionState> {
        self.slot(name).ok().map(ServerSlot::snapshot)
    }

    /// Names of all tools on connected servers, sorted and deduplicated.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connected_tools()
            .into_iter()
            .map(|(_, t)| t.name)
            .collect();
        names.sort();
        names
    }

    /// Schemas for all tools on connected servers.  When two servers offer
    /// the same name the first configured one wins.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.connected_tools()
            .into_iter()
            .map(|(_, t)| ToolSchema {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema,
            })
            .collect()
    }

    fn connected_tools(&self) -> Vec<(String, ToolInfo)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for slot in &self.servers {
            let st = slot.snapshot();
            if st.status != ServerStatus::Connected {
                continue;
            }
            for tool in st.tools {
                if seen.insert(tool.name.clone()) {
                    out.push((st.name.clone(), tool));
                }
            }
        }
        out
    }

    fn owner_of(&self, tool: &str) -> Option<&ServerSlot> {
        self.servers.iter().find(|s| s.offers(tool))
    }

    /// Call `tool` on the server that offers it.
    pub async fn call(&self, tool: &str, args: &Value) -> Result<CallToolResult, McpError> {
        let slot = self
            .owner_of(tool)
            .ok_or_else(|| McpError::UnknownTool(tool.to_string()))?;
        validate_arguments(args)?;

        let transport = slot
            .transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::NotConnected(slot.name().to_string()))?;
        let arguments = if args.is_null() { json!({}) } else { args.clone() };

        let result = async {
            let raw = transport
                .request("tools/call", Some(json!({ "name": tool, "arguments": arguments })))
                .await?;
            Ok::<_, McpError>(serde_json::from_value::<CallToolResult>(raw)?)
        }
        .await;

        if let Err(e) = &result {
            if e.is_protocol() {
                warn!(server = slot.name(), tool, error = %e, "mcp tool call failed");
            } else {
                error!(server = slot.name(), tool, error = ?e, "mcp tool call failed");
            }
        }
        result
    }
}

#[async_trait]
impl ToolProvider for McpManager {
    fn provider_name(&self) -> &str {
        "mcp"
    }

    fn has_tool(&self, name: &str) -> bool {
        self.owner_of(name).is_some()
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.schemas()
    }

    async fn call_tool(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let result = tokio::select! {
            r = self.call(&call.name, &call.args) => r,
            _ = ctx.cancel.cancelled() => Err(McpError::Cancelled),
        };
        match result {
            Ok(r) => ToolOutput {
                call_id: call.id.clone(),
                content: r.text(),
                is_error: r.is_error,
            },
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}
