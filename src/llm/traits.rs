//! 推理引擎客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Groq / Mock）实现 LlmClient：输入清洗后的消息窗口与工具描述，
//! 返回一条 assistant 消息（可能携带工具调用请求）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 推理引擎调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 网络错误、限流与 5xx 可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::InvalidResponse(_) => false,
        }
    }
}

/// 推理引擎客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 给定消息窗口与可用工具，返回下一条 assistant 消息
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError>;

    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试配置：指数退避
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    fn backoff_for(&self, attempt: u32, err: &LlmError) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        match err {
            LlmError::RateLimited { retry_after_ms } => {
                exp.max(Duration::from_millis(*retry_after_ms)).min(self.max_backoff)
            }
            _ => exp,
        }
    }
}

/// 对可重试错误做指数退避重试的包装客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages, tools).await {
                Ok(msg) => return Ok(msg),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let wait = self.config.backoff_for(attempt, &e);
                    tracing::warn!(attempt = attempt + 1, wait_ms = wait.as_millis() as u64, error = %e, "retrying LLM call");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_errors() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Network("reset".into())),
            Err(LlmError::RateLimited { retry_after_ms: 1 }),
            Ok(Message::assistant("ok")),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast());
        let msg = client.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(msg.content, "ok");
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_fatal_error() {
        let scripted = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Api { status: 401, message: "bad key".into() }),
            Ok(Message::assistant("unreachable")),
        ]));
        let client = RetryingLlmClient::new(scripted.clone(), fast());
        assert!(client.complete(&[], &[]).await.is_err());
        assert_eq!(scripted.call_count(), 1);
    }
}
