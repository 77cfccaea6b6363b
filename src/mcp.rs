//! MCP 协议引擎：按行读取 JSON-RPC 消息，分发到工具注册表，逐行写回响应。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::{Invocation, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    /// Echoes the request id; omitted when the request carried none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    fn success(id: Option<Value>, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Self {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => Self::failure(id, INTERNAL_ERROR, format!("encode result: {e}"), None),
        }
    }

    fn failure(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![TextContent { kind: "text", text }],
            is_error,
        }
    }
}

/// Stateless apart from the read-only registry; one message is handled at a time.
pub struct McpServer {
    name: String,
    version: String,
    registry: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            registry,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one raw line. `None` means nothing is written back.
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(req) => self.handle_request(req).await,
            Err(e) => {
                warn!(error = %e, "unparseable message");
                Some(RpcResponse::failure(
                    Some(Value::Null),
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                    None,
                ))
            }
        }
    }

    /// Like [`McpServer::handle_line`] for a raw line that may not be UTF-8.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Option<RpcResponse> {
        match std::str::from_utf8(raw) {
            Ok(line) => self.handle_line(line).await,
            Err(e) => {
                warn!(error = %e, "message is not valid UTF-8");
                Some(RpcResponse::failure(
                    Some(Value::Null),
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                    None,
                ))
            }
        }
    }

    pub async fn handle_request(&self, req: RpcRequest) -> Option<RpcResponse> {
        debug!(method = %req.method, id = ?req.id, "request");
        let id = req.id;
        let resp = match req.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize_result()),
            "initialized" | "notifications/initialized" => {
                debug!("client initialized");
                return None;
            }
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => RpcResponse::success(id, json!({ "tools": self.registry.list() })),
            "tools/call" => self.call_tool(id, req.params).await,
            other => RpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
                None,
            ),
        };
        Some(resp)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }

    async fn call_tool(&self, id: Option<Value>, params: Value) -> RpcResponse {
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    "invalid params: expected {name, arguments}".to_string(),
                    Some(Value::String(e.to_string())),
                )
            }
        };

        let result = match self.registry.dispatch(&params.name, params.arguments).await {
            None => {
                warn!(tool = %params.name, "unknown tool");
                return RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    format!("Unknown tool: {}", params.name),
                    Some(json!({ "tool": params.name })),
                );
            }
            Some(Invocation::InvalidArguments(detail)) => {
                return RpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    format!("invalid arguments for {}", params.name),
                    Some(Value::String(detail)),
                );
            }
            Some(Invocation::Completed(Ok(output))) => match serde_json::to_string_pretty(&output) {
                Ok(text) => CallToolResult::text(text, false),
                Err(e) => CallToolResult::text(format!("Error: encode result: {e}"), true),
            },
            Some(Invocation::Completed(Err(e))) => {
                info!(tool = %params.name, error = %e, "tool call failed");
                CallToolResult::text(format!("Error: {e}"), true)
            }
        };
        RpcResponse::success(id, result)
    }

    /// Read messages until EOF or until `shutdown` flips to `true`.
    ///
    /// 关闭信号只在等待下一行时检查，正在执行的工具调用总会写出响应。
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // 按字节读取：非 UTF-8 的行只得到 parse error，不会中断循环
        let mut buf = Vec::new();
        loop {
            let n = tokio::select! {
                n = reader.read_until(b'\n', &mut buf) => n?,
                _ = shutdown_requested(&mut shutdown) => {
                    info!("shutdown requested, closing protocol loop");
                    break;
                }
            };
            if n == 0 {
                debug!("input closed");
                break;
            }
            let resp = self.handle_bytes(&buf).await;
            buf.clear();
            if let Some(resp) = resp {
                write_response(&mut writer, &resp).await?;
            }
        }
        Ok(())
    }
}

/// Resolves once the flag is `true`; never resolves if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let stopped = rx.wait_for(|stop| *stop).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, resp: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn run_stdio(server: Arc<McpServer>, shutdown: watch::Receiver<bool>) -> Result<()> {
    info!(tools = server.registry().len(), "serving MCP over stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    server.serve(stdin, tokio::io::stdout(), shutdown).await
}
