//! 用户档案工具服务：stdio 上的 JSON-RPC，提供 get_user_profile 与 update_communication_preference
//!
//! 档案文件路径：第一个参数 > 环境变量 RIVER_PROFILE_PATH > ./user_profile.json

use std::path::PathBuf;
use std::sync::Arc;

use river::mcp::McpServer;
use river::tools::{GetUserProfileTool, ProfileStore, ToolRegistry, UpdatePreferenceTool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    river::observability::init_stderr();

    let path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(river::agent::PROFILE_PATH_ENV).ok())
        .unwrap_or_else(|| "user_profile.json".to_string())
        .into();
    tracing::info!(path = %path.display(), "profile database");

    let store = Arc::new(ProfileStore::new(path));
    let mut registry = ToolRegistry::new();
    registry.register(GetUserProfileTool::new(store.clone()));
    registry.register(UpdatePreferenceTool::new(store));

    let server = McpServer::new("riverline-profile-server", registry);
    server.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}
