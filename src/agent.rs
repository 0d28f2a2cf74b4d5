//! 组装根：由 AppConfig 构建推理客户端、工具执行器（本地工具 + 远程档案工具）、存储与编排器

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::core::TurnOrchestrator;
use crate::llm::create_llm_from_config;
use crate::mcp::StdioMcpClient;
use crate::memory::{create_store_from_config, HistorySanitizer};
use crate::tools::{local_registry, register_remote_tools, ToolExecutor, ToolRegistry};

pub const PROFILE_SERVER_BIN: &str = "river-profile-server";
/// 传给档案服务的档案文件路径环境变量
pub const PROFILE_PATH_ENV: &str = "RIVER_PROFILE_PATH";

/// 档案服务可执行文件：配置优先，否则取与当前可执行文件同目录的 river-profile-server
pub fn profile_server_command(cfg: &AppConfig) -> String {
    if let Some(cmd) = cfg.tools.profile_server.command.as_ref().filter(|c| !c.trim().is_empty()) {
        return cmd.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(format!("{PROFILE_SERVER_BIN}{}", std::env::consts::EXE_SUFFIX))))
        .filter(|p| p.exists())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| PROFILE_SERVER_BIN.to_string())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|d| d.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// 构建工具注册表；档案服务不可用时只保留本地工具
pub async fn build_tool_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut registry = local_registry();
    let server = &cfg.tools.profile_server;
    if server.enabled {
        let client = StdioMcpClient::new(profile_server_command(cfg), server.args.clone(), server.timeout_secs)
            .with_env(PROFILE_PATH_ENV, absolute(&cfg.app.profile_path).to_string_lossy());
        register_remote_tools(&mut registry, Arc::new(client)).await;
    } else {
        tracing::info!("profile server disabled, using local tools only");
    }
    registry
}

/// 由配置构建编排器
pub async fn build_orchestrator(cfg: &AppConfig) -> anyhow::Result<TurnOrchestrator> {
    let llm = create_llm_from_config(cfg);
    let registry = build_tool_registry(cfg).await;
    tracing::info!(tools = ?registry.tool_names(), "tools registered");
    let executor = Arc::new(ToolExecutor::new(registry, cfg.tools.tool_timeout_secs));
    let store = create_store_from_config(&cfg.storage)
        .await
        .context("failed to open thread store")?;
    let sanitizer = HistorySanitizer::new(cfg.history.window_size).with_orphan_policy(cfg.history.orphan_policy);

    Ok(TurnOrchestrator::new(llm, executor, store)
        .with_sanitizer(sanitizer)
        .with_max_iterations(cfg.history.max_iterations))
}
