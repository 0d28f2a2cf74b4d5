//! 远程工具代理：把档案服务暴露的每个工具注册为本地 Tool，每次调用独立建会话
//!
//! 传输失败（子进程起不来、响应格式错误、超时）转为错误文本，与普通工具失败走同一路径。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::mcp::{StdioMcpClient, ToolInfo};
use crate::tools::{Tool, ToolRegistry};

pub struct RemoteTool {
    info: ToolInfo,
    description: String,
    client: Arc<StdioMcpClient>,
}

impl RemoteTool {
    pub fn new(info: ToolInfo, client: Arc<StdioMcpClient>) -> Self {
        let description = info
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "Remote profile tool".to_string());
        Self {
            info,
            description,
            client,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        match self.client.call_tool(&self.info.name, args).await {
            Ok(result) if result.is_error => Err(result.text()),
            Ok(result) => Ok(result.text()),
            Err(e) => {
                tracing::warn!(tool = %self.info.name, error = %e, "remote tool transport failed");
                Err(format!("Error: remote tool '{}' unavailable: {e}", self.info.name))
            }
        }
    }
}

/// 启动时列出远程工具并注册代理；失败只记警告，返回注册数量
pub async fn register_remote_tools(registry: &mut ToolRegistry, client: Arc<StdioMcpClient>) -> usize {
    match client.list_tools().await {
        Ok(tools) => {
            let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
            let count = tools.len();
            for info in tools {
                registry.register(RemoteTool::new(info, client.clone()));
            }
            tracing::info!(count, tools = ?names, "loaded remote profile tools");
            count
        }
        Err(e) => {
            tracing::warn!(command = %client.command(), error = %e, "failed to load remote tools, continuing with local tools");
            0
        }
    }
}
