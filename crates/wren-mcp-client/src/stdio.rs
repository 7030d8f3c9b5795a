// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Newline-delimited JSON-RPC over a child process's stdin/stdout.
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::McpError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::transport::McpTransport;

/// How long a server gets to exit on its own after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type Reply = Result<Value, McpError>;
type PendingMap = Arc<StdMutex<HashMap<i64, oneshot::Sender<Reply>>>>;

pub struct StdioTransport {
    server: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    next_id: AtomicI64,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<i64, oneshot::Sender<Reply>>> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

impl StdioTransport {
    /// Spawn `command` and start reading its responses.
    ///
    /// The child is killed when the transport is dropped.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::from_spawn(e, command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout unavailable".into()))?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(server.to_string(), stdout, pending.clone()));
        debug!(server, command, pid = child.id(), "mcp server spawned");

        Ok(Self {
            server: server.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicI64::new(1),
            reader: StdMutex::new(Some(reader)),
        })
    }

    async fn write_line(&self, line: String) -> Result<(), McpError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::Protocol(format!("{}: connection closed", self.server)))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn read_loop(server: String, stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                dispatch_line(&server, line, &pending);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server, error = %e, "mcp read failed");
                break;
            }
        }
    }
    debug!(server = %server, "mcp server closed stdout");
    for (_, tx) in lock(&pending).drain() {
        let _ = tx.send(Err(McpError::Protocol(format!(
            "{server}: server closed the connection"
        ))));
    }
}

fn dispatch_line(server: &str, line: &str, pending: &PendingMap) {
    let resp: JsonRpcResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(server, error = %e, "ignoring malformed line from mcp server");
            return;
        }
    };
    let id = match resp.id {
        Some(RpcId::Number(id)) => id,
        // Server-initiated notifications and requests are not supported.
        _ => {
            trace!(server, "ignoring message without numeric id");
            return;
        }
    };
    let Some(tx) = lock(pending).remove(&id) else {
        debug!(server, id, "response for unknown request");
        return;
    };
    let reply = match (resp.error, resp.result) {
        (Some(err), _) => Err(McpError::Server {
            code: err.code,
            message: err.message,
        }),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    };
    let _ = tx.send(reply);
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.write_line(line).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        trace!(server = %self.server, id, method, "mcp request sent");
        rx.await.map_err(|_| {
            McpError::Protocol(format!("{}: connection closed before reply", self.server))
        })?
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_line(line).await
    }

    async fn close(&self) -> Result<(), McpError> {
        // Closing stdin asks a well-behaved server to exit.
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    debug!(server = %self.server, ?status, "mcp server exited");
                }
                Err(_) => {
                    debug!(server = %self.server, "mcp server did not exit; killing");
                    child.kill().await?;
                }
            }
        }

        let reader = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = reader {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_not_found() {
        let err = StdioTransport::spawn(
            "ghost",
            "/nonexistent/wren-mcp-server",
            &[],
            &HashMap::new(),
        )
        .err()
        .expect("spawn must fail");
        assert!(matches!(err, McpError::NotFound(_)), "{err}");
        assert!(err.to_string().contains("not found"));
    }

    /// A shell script that answers every request line with an empty result
    /// carrying the request's id.
    #[cfg(unix)]
    #[tokio::test]
    async fn requests_are_matched_by_id() {
        let script = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  if [ -n "$id" ]; then printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$id"; fi
done"#;
        let t = StdioTransport::spawn(
            "echo",
            "sh",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
        )
        .unwrap();
        let (a, b) = tokio::join!(t.request("ping", None), t.request("ping", None));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a["echo"], b["echo"]);
        t.close().await.unwrap();
        // Closed transports refuse further requests.
        assert!(t.request("ping", None).await.is_err());
        t.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_exit_fails_pending_requests() {
        let t = StdioTransport::spawn(
            "quitter",
            "sh",
            &["-c".to_string(), "read -r line; exit 0".to_string()],
            &HashMap::new(),
        )
        .unwrap();
        let err = t.request("initialize", None).await.unwrap_err();
        assert!(err.is_protocol(), "{err}");
        t.close().await.unwrap();
    }
}
