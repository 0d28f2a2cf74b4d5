//! 档案服务端主循环：从 reader 逐行读取 JSON-RPC 请求，把工具注册表暴露为 tools/list 与 tools/call

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::mcp::protocol::{
    CallToolParams, CallToolResult, ContentBlock, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolInfo,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;

pub struct McpServer {
    name: String,
    version: String,
    registry: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry,
        }
    }

    /// 处理直到 reader 关闭（EOF）
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(server = %self.name, tools = self.registry.len(), "tool server ready");
        let mut lines = FramedRead::new(reader, LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read request line");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(resp) = self.handle_line(&line).await {
                let mut out = serde_json::to_string(&resp)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        tracing::info!(server = %self.name, "client disconnected, shutting down");
        Ok(())
    }

    /// 处理一行输入；通知不产生响应
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("Parse error: {e}")));
            }
        };
        let req: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };
        if req.is_notification() {
            tracing::debug!(method = %req.method, "notification");
            return None;
        }
        let id = req.id.clone().unwrap_or(Value::Null);
        Some(match self.dispatch(&req).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    async fn dispatch(&self, req: &JsonRpcRequest) -> Result<Value, (i32, String)> {
        match req.method.as_str() {
            "initialize" => {
                let version = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION);
                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": self.name, "version": self.version},
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = self
                    .registry
                    .specs()
                    .into_iter()
                    .map(|s| ToolInfo {
                        name: s.name,
                        description: Some(s.description),
                        input_schema: s.parameters,
                    })
                    .collect();
                to_value(ListToolsResult { tools })
            }
            "tools/call" => {
                let params: CallToolParams = req
                    .params
                    .clone()
                    .ok_or_else(|| (INVALID_PARAMS, "missing params".to_string()))
                    .and_then(|p| {
                        serde_json::from_value(p).map_err(|e| (INVALID_PARAMS, format!("Invalid params: {e}")))
                    })?;
                if !self.registry.contains(&params.name) {
                    return Err((INVALID_PARAMS, format!("Unknown tool: {}", params.name)));
                }
                tracing::info!(tool = %params.name, "tools/call");
                let result = match self.registry.execute(&params.name, params.arguments).await {
                    Ok(text) => CallToolResult {
                        content: vec![ContentBlock::text(text)],
                        is_error: false,
                    },
                    Err(text) => CallToolResult {
                        content: vec![ContentBlock::text(text)],
                        is_error: true,
                    },
                };
                to_value(result)
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }
}

fn to_value<T: serde::Serialize>(v: T) -> Result<Value, (i32, String)> {
    serde_json::to_value(v).map_err(|e| (crate::mcp::protocol::INTERNAL_ERROR, e.to_string()))
}
