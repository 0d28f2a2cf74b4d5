//! River - Rust 债务协商对话智能体
//!
//! 模块划分：
//! - **agent**: 组装根，由配置构建编排器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 单轮编排、状态机、过程事件、错误
//! - **llm**: 推理引擎客户端抽象与实现（OpenAI 兼容 / Groq / Mock）
//! - **mcp**: 档案工具服务的 stdio 协议（客户端与服务端）
//! - **memory**: 消息模型、历史窗口清洗、会话持久化
//! - **observability**: 日志初始化
//! - **prompt**: 人设提示词
//! - **tools**: 工具箱（EMI、结清政策、用户档案、远程代理）与调用桥

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod prompt;
pub mod tools;
