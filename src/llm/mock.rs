//! Mock 推理客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：对最后一条工具结果或用户消息做回显，不发起工具调用
//! - ScriptedLlmClient：按脚本依次返回预设结果，并记录每次收到的消息窗口

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

/// Mock 客户端：回显最后一条工具结果或用户消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<Message, LlmError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User | Role::Tool));
        let reply = match last {
            Some(m) if m.role == Role::Tool => format!("Tool result: {}", m.content),
            Some(m) => format!("Echo from Mock: {}", m.content),
            None => "Echo from Mock: (no input)".to_string(),
        };
        Ok(Message::assistant(reply))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本客户端：脚本耗尽后返回 InvalidResponse
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Message, LlmError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<Message, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用收到的消息窗口
    pub fn seen_windows(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<Message, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
