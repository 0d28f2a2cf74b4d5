//! Groq API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.groq.com/openai/v1
//! - 默认模型: llama-3.3-70b-versatile

use crate::llm::{LlmError, OpenAiClient};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Groq 是否已配置凭据
pub fn groq_api_key() -> Option<String> {
    std::env::var("GROQ_API_KEY").ok().filter(|k| !k.trim().is_empty())
}

/// 创建 Groq 客户端
///
/// - 使用环境变量 `GROQ_API_KEY`
/// - 模型可通过 `model` 参数或 `GROQ_MODEL` 环境变量指定
pub fn create_groq_client(
    model: Option<&str>,
    base_url: Option<&str>,
    request_timeout_secs: u64,
) -> Result<OpenAiClient, LlmError> {
    let api_key = groq_api_key().unwrap_or_else(|| "gsk-placeholder".to_string());
    let model = model
        .map(String::from)
        .or_else(|| std::env::var("GROQ_MODEL").ok())
        .unwrap_or_else(|| GROQ_DEFAULT_MODEL.to_string());

    OpenAiClient::new(
        Some(base_url.unwrap_or(GROQ_BASE_URL)),
        &model,
        Some(api_key.as_str()),
        request_timeout_secs,
    )
}
