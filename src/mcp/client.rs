//! 档案服务 stdio 客户端
//!
//! 每次操作独立起一个子进程会话：initialize -> notifications/initialized -> 请求 -> 关闭。
//! 整个会话受超时约束；子进程随 Child 析构被杀掉，不会残留。

use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::mcp::protocol::{
    CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolInfo,
    PROTOCOL_VERSION,
};

const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection")]
    Closed,

    #[error("session timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl From<LinesCodecError> for McpError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(io) => McpError::Io(io),
            LinesCodecError::MaxLineLengthExceeded => McpError::Protocol("response line too long".into()),
        }
    }
}

/// 以子进程 stdio 方式访问工具服务
#[derive(Debug, Clone)]
pub struct StdioMcpClient {
    command: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl StdioMcpClient {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            args,
            envs: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// 列出服务端工具
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let result = self.one_shot("tools/list", json!({})).await?;
        let list: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;
        tracing::debug!(command = %self.command, count = list.tools.len(), "listed remote tools");
        Ok(list.tools)
    }

    /// 调用一个工具（独立会话）
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = self.one_shot("tools/call", params).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))
    }

    /// 起会话、握手、发一个请求、关闭；整体受超时约束
    async fn one_shot(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let run = async {
            let mut session = Session::spawn(self).await?;
            session.initialize().await?;
            let out = session.request(method, Some(params)).await;
            session.close().await;
            out
        };
        timeout(self.timeout, run)
            .await
            .map_err(|_| McpError::Timeout(self.timeout))?
    }
}

struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: FramedRead<ChildStdout, LinesCodec>,
    next_id: u64,
}

impl Session {
    async fn spawn(client: &StdioMcpClient) -> Result<Self, McpError> {
        let mut cmd = Command::new(&client.command);
        cmd.args(&client.args)
            .envs(client.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: client.command.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
            next_id: 1,
        })
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "river", "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", Some(params)).await?;
        self.send(&JsonRpcRequest::notification("notifications/initialized")).await
    }

    async fn send(&mut self, req: &JsonRpcRequest) -> Result<(), McpError> {
        let stdin = self.stdin.as_mut().ok_or(McpError::Closed)?;
        let mut line = serde_json::to_string(req).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// 发送请求并读到 id 匹配的响应；其间的通知与非 JSON 行被跳过
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let line = self.lines.next().await.ok_or(McpError::Closed)??;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let resp: JsonRpcResponse = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping non-response line from tool server");
                    continue;
                }
            };
            if resp.id != Value::from(id) {
                continue;
            }
            if let Some(err) = resp.error {
                return Err(McpError::Remote {
                    code: err.code,
                    message: err.message,
                });
            }
            return resp
                .result
                .ok_or_else(|| McpError::Protocol(format!("{method}: response has neither result nor error")));
        }
    }

    /// 关闭 stdin 让服务端自然退出，短暂等待后强制结束
    async fn close(mut self) {
        drop(self.stdin.take());
        if timeout(Duration::from_millis(500), self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let client = StdioMcpClient::new("/nonexistent/river-profile-server", vec![], 5);
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }), "{err}");
    }
}
