//! 工具执行器（调用桥）
//!
//! 持有 ToolRegistry 与全局超时。execute 返回 AgentError（ToolNotFound / ToolTimeout / ToolExecutionFailed），
//! invoke / invoke_call 把任何失败转成错误文本，保证推理引擎总能看到一条结果；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::memory::{Message, ToolCall};
use crate::tools::{ToolRegistry, ToolSpec};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；未注册返回 ToolNotFound，超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let Some(tool) = self.registry.get(tool_name) else {
            audit(tool_name, "not_found", 0, &args);
            return Err(AgentError::ToolNotFound(tool_name.to_string()));
        };

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        audit_line(tool_name, outcome, start.elapsed().as_millis() as u64, preview);

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 调用桥：永不失败，错误以文本返回
    pub async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> String {
        match self.execute(tool_name, args).await {
            Ok(content) => content,
            Err(AgentError::ToolNotFound(name)) => format!(
                "Error: Tool '{}' not found. Available tools: {}",
                name,
                self.registry.tool_names().join(", ")
            ),
            Err(AgentError::ToolTimeout(name)) => format!(
                "Error: Tool '{}' timed out after {}s",
                name,
                self.timeout.as_secs()
            ),
            Err(AgentError::ToolExecutionFailed(msg)) if msg.starts_with("Error") => msg,
            Err(AgentError::ToolExecutionFailed(msg)) => format!("Error: {msg}"),
            Err(other) => format!("Error: {other}"),
        }
    }

    /// 执行单个工具调用请求，返回与之关联的结果消息
    pub async fn invoke_call(&self, call: &ToolCall) -> Message {
        let content = self.invoke(&call.name, call.arguments.clone()).await;
        Message::tool_result(call.id.clone(), content)
    }

    /// 并发执行同一条 assistant 消息中的全部调用，结果按请求顺序返回
    pub async fn invoke_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        join_all(calls.iter().map(|c| self.invoke_call(c))).await
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn audit(tool_name: &str, outcome: &str, duration_ms: u64, args: &serde_json::Value) {
    audit_line(tool_name, outcome, duration_ms, args_preview(args));
}

fn audit_line(tool_name: &str, outcome: &str, duration_ms: u64, args_preview: String) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool_name,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CalculateEmiTool, SettlementPolicyTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(CalculateEmiTool);
        registry.register(SettlementPolicyTool);
        ToolExecutor::new(registry, 30)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_text() {
        let exec = executor();
        assert!(matches!(
            exec.execute("transfer_funds", json!({})).await,
            Err(AgentError::ToolNotFound(_))
        ));
        let text = exec.invoke("transfer_funds", json!({})).await;
        assert!(text.starts_with("Error: Tool 'transfer_funds' not found"));
        assert!(text.contains("calculate_emi, check_settlement_policy"));
    }

    #[tokio::test]
    async fn test_failure_becomes_text() {
        let text = executor()
            .invoke("calculate_emi", json!({"principal": 1, "rate_of_interest": 1}))
            .await;
        assert!(text.starts_with("Error: invalid arguments"), "{text}");
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let exec = ToolExecutor {
            registry,
            timeout: Duration::from_millis(20),
        };
        assert!(matches!(
            exec.execute("slow", Value::Null).await,
            Err(AgentError::ToolTimeout(_))
        ));
        assert!(exec.invoke("slow", Value::Null).await.contains("timed out"));
    }

    #[tokio::test]
    async fn test_invoke_all_keeps_order_and_ids() {
        let exec = executor();
        let calls = vec![
            ToolCall::new("a", "check_settlement_policy", json!({"debt_amount": 12000})),
            ToolCall::new("b", "check_settlement_policy", json!({"debt_amount": 5000})),
        ];
        let results = exec.invoke_all(&calls).await;
        assert_eq!(results[0].tool_call_id.as_deref(), Some("a"));
        assert!(results[0].content.contains("20%"));
        assert_eq!(results[1].tool_call_id.as_deref(), Some("b"));
        assert!(results[1].content.contains("30%"));
    }
}
