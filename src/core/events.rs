//! 单轮过程事件：用于 CLI / 前端展示状态迁移、工具调用、观察与回复

use serde::Serialize;

use crate::core::TurnState;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 状态机迁移
    State { state: TurnState, iteration: usize },
    /// 窗口清洗结果（仅当有改写 / 丢弃时发送）
    Sanitized {
        window_len: usize,
        rewritten: usize,
        dropped: usize,
    },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 最终回复
    Reply { text: String },
    /// 被吸收的错误（推理失败、循环超限）
    Error { text: String },
}
