//! 推理引擎层：客户端抽象与实现（OpenAI 兼容 / Groq / Mock）

pub mod groq;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

pub use groq::{create_groq_client, GROQ_BASE_URL, GROQ_DEFAULT_MODEL};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient};

/// 根据配置创建推理客户端（外层包一层重试）
///
/// - provider = "groq"：需 `GROQ_API_KEY`
/// - provider = "openai"：需 `OPENAI_API_KEY`，可配 base_url 指向兼容端点
/// - provider = "mock" 或缺少凭据：回退到 MockLlmClient
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    let timeout = llm.timeouts.request;
    let built: Option<Result<OpenAiClient, LlmError>> = match llm.provider.to_lowercase().as_str() {
        "groq" => groq::groq_api_key().map(|_| {
            create_groq_client(Some(&llm.model), llm.base_url.as_deref(), timeout)
        }),
        "openai" => std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|key| OpenAiClient::new(llm.base_url.as_deref(), &llm.model, Some(key.as_str()), timeout)),
        "mock" => None,
        other => {
            tracing::warn!(provider = other, "unknown LLM provider, using mock");
            None
        }
    };

    let inner: Arc<dyn LlmClient> = match built {
        Some(Ok(client)) => {
            tracing::info!(provider = %llm.provider, model = %llm.model, "LLM client ready");
            Arc::new(client.with_temperature(llm.temperature))
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "failed to build LLM client, using mock");
            Arc::new(MockLlmClient)
        }
        None => {
            if llm.provider != "mock" {
                tracing::warn!(provider = %llm.provider, "no API key configured, using mock LLM");
            }
            Arc::new(MockLlmClient)
        }
    };

    Arc::new(RetryingLlmClient::new(
        inner,
        RetryConfig {
            max_retries: llm.retry.max_retries,
            initial_backoff: Duration::from_millis(llm.retry.initial_backoff_ms),
            ..RetryConfig::default()
        },
    ))
}
