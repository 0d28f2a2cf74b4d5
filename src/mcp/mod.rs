//! 工具服务 stdio 协议：协议类型、按调用建会话的客户端、服务端主循环

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{McpError, StdioMcpClient};
pub use protocol::{CallToolResult, ContentBlock, ToolInfo};
pub use server::McpServer;
