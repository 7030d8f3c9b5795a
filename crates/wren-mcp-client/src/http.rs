// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON-RPC over HTTP POST.
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::McpError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::transport::McpTransport;

const SESSION_HEADER: &str = "mcp-session-id";
const EVENT_STREAM: &str = "text/event-stream";

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicI64,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Self, McpError> {
        let mut defaults = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| McpError::Protocol(format!("invalid header name {k:?}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| McpError::Protocol(format!("invalid header value for {k}: {e}")))?;
            defaults.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(defaults)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicI64::new(1),
            session_id: Mutex::new(None),
        })
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(id) = self.session_id.lock().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        let resp = req.send().await?.error_for_status()?;
        if let Some(id) = resp.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().await = Some(id.to_string());
        }
        Ok(resp)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let http = self.post(body).await?;
        let is_stream = http
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(EVENT_STREAM));
        let resp = if is_stream {
            response_from_sse(&http.text().await?, id)?
        } else {
            http.json::<JsonRpcResponse>().await?
        };
        match (resp.error, resp.result) {
            (Some(err), _) => Err(McpError::Server {
                code: err.code,
                message: err.message,
            }),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.post(body).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        debug!(url = %self.url, "ending mcp http session");
        self.client
            .delete(&self.url)
            .header(SESSION_HEADER, id)
            .send()
            .await?;
        Ok(())
    }
}

/// Pick the response to request `id` out of a buffered event stream.
///
/// Each event's `data:` lines are joined with newlines; events that are not
/// JSON-RPC responses (notifications, server requests) are skipped.
fn response_from_sse(body: &str, id: i64) -> Result<JsonRpcResponse, McpError> {
    let wanted = RpcId::Number(id);
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                let payload = data.join("\n");
                data.clear();
                match serde_json::from_str::<JsonRpcResponse>(&payload) {
                    Ok(resp) if resp.id.as_ref() == Some(&wanted) => return Ok(resp),
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "skipping non-response event"),
                }
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    Err(McpError::Protocol(format!(
        "no response for request {id} in event stream"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_stream_response_is_matched_by_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":6,\"result\":{\"stale\":true}}\n\
                    \n\
                    id: 42\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\n\
                    data: \"result\":{\"tools\":[]}}\n";
        let resp = response_from_sse(body, 7).unwrap();
        assert_eq!(resp.id, Some(RpcId::Number(7)));
        assert_eq!(resp.result, Some(serde_json::json!({ "tools": [] })));
    }

    #[test]
    fn event_stream_without_matching_response_is_an_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n: keep-alive\n\n";
        let err = response_from_sse(body, 2).unwrap_err();
        assert!(err.to_string().contains("no response for request 2"), "{err}");
    }

    #[test]
    fn rejects_bad_header_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = HttpTransport::new("http://localhost:1", &headers).err().unwrap();
        assert!(err.to_string().contains("invalid header name"), "{err}");
    }

    #[tokio::test]
    async fn close_without_session_is_a_no_op() {
        let t = HttpTransport::new("http://127.0.0.1:9", &HashMap::new()).unwrap();
        t.close().await.unwrap();
        t.close().await.unwrap();
    }
}
