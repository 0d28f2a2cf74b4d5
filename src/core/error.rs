//! Agent 错误类型
//!
//! 一轮对话内，推理引擎与工具的错误都会被转换为可见文本；只有持久化错误会从 run_turn 返回给调用方。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

/// Agent 运行过程中可能出现的错误（推理、工具、持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_to_persistence() {
        let err = AgentError::from(StoreError::Task("boom".into()));
        assert!(matches!(err, AgentError::Persistence(StoreError::Task(_))));
        assert_eq!(err.to_string(), "Persistence error: Storage task failed: boom");
    }

    #[test]
    fn test_llm_error_converts() {
        let err = AgentError::from(LlmError::RateLimited { retry_after_ms: 1000 });
        assert!(matches!(err, AgentError::LlmError(LlmError::RateLimited { .. })));
        assert!(AgentError::ToolNotFound("x".into()).to_string().contains("x"));
    }
}
