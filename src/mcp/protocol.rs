//! MCP JSON-RPC protocol implementation
//!
//! Line-delimited JSON-RPC 2.0 over stdio. Every request runs as its own
//! task; responses are written as they complete and may arrive out of order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::{MembankError, Result};

/// MCP JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl McpRequest {
    /// Requests without an ID are notifications and get no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// MCP JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

/// MCP error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Error response carrying the kind, service and retry hint
    pub fn from_error(id: Option<Value>, err: MembankError) -> Self {
        let data = json!({
            "kind": err.kind(),
            "service": err.service(),
            "retryable": err.is_retryable(),
        });
        let mut response = Self::error(id, err.code(), err.to_string());
        if let Some(ref mut error) = response.error {
            error.data = Some(data);
        }
        response
    }
}

/// Trait for handling MCP requests
#[async_trait]
pub trait McpHandler: Send + Sync + 'static {
    /// `cancel` fires when the client sends `notifications/cancelled` for this request
    async fn handle_request(&self, request: McpRequest, cancel: CancellationToken) -> McpResponse;
}

/// MCP server over any line-oriented async reader and writer
pub struct McpServer<H>
where
    H: McpHandler,
{
    handler: Arc<H>,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl<H: McpHandler> McpServer<H> {
    /// Create a new MCP server
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels every in-flight request when triggered
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server, reading from stdin and writing to stdout
    pub async fn run(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until the reader hits EOF, then wait for in-flight requests
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        let mut lines = BufReader::new(reader).lines();
        let mut tasks = tokio::task::JoinSet::new();

        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    let response = McpResponse::error(None, -32700, format!("Parse error: {}", e));
                    write_response(&writer, &response).await?;
                    continue;
                }
            };

            if request.method == methods::CANCELLED {
                self.cancel_request(&request.params);
                continue;
            }

            let key = request.id.as_ref().map(request_key);
            let cancel = self.shutdown.child_token();
            if let Some(ref key) = key {
                self.in_flight.lock().insert(key.clone(), cancel.clone());
            }

            let handler = self.handler.clone();
            let in_flight = self.in_flight.clone();
            let writer = writer.clone();
            tasks.spawn(async move {
                let notification = request.is_notification();
                let response = handler.handle_request(request, cancel).await;
                if let Some(key) = key {
                    in_flight.lock().remove(&key);
                }
                if !notification {
                    if let Err(e) = write_response(&writer, &response).await {
                        tracing::error!("Error writing response: {}", e);
                    }
                }
            });

            // Reap finished handlers so the set stays small
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Request handler panicked: {}", e);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Request handler panicked: {}", e);
            }
        }

        Ok(())
    }

    fn cancel_request(&self, params: &Value) {
        let Some(id) = params.get("requestId") else {
            return;
        };
        if let Some(token) = self.in_flight.lock().remove(&request_key(id)) {
            tracing::debug!(request_id = %id, "request cancelled by client");
            token.cancel();
        }
    }
}

fn request_key(id: &Value) -> String {
    id.to_string()
}

async fn write_response<W>(writer: &tokio::sync::Mutex<W>, response: &McpResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Standard MCP methods
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
}

/// MCP tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: "membank".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolCallResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Create a JSON result
    pub fn json(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_default();
        Self::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Service;

    struct Echo;

    #[async_trait]
    impl McpHandler for Echo {
        async fn handle_request(&self, request: McpRequest, _cancel: CancellationToken) -> McpResponse {
            McpResponse::success(request.id, json!({"method": request.method}))
        }
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response = McpResponse::from_error(
            Some(json!(1)),
            MembankError::unavailable(Service::Embedding, "connection refused"),
        );
        let error = response.error.unwrap();
        assert_eq!(error.code, -32003);
        let data = error.data.unwrap();
        assert_eq!(data["kind"], "service_unavailable");
        assert_eq!(data["service"], "embedding");
        assert_eq!(data["retryable"], true);
    }

    #[tokio::test]
    async fn test_serve_lines() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n",
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        );
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        let server = McpServer::new(Echo);
        server.serve(input.as_bytes(), server_side).await.unwrap();

        let mut output = String::new();
        let mut client = client;
        tokio::io::AsyncReadExt::read_to_string(&mut client, &mut output)
            .await
            .unwrap();

        let responses: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert!(responses
            .iter()
            .any(|r| r["id"] == 1 && r["result"]["method"] == "tools/list"));
        assert!(responses.iter().any(|r| r["error"]["code"] == -32700));
    }
}
