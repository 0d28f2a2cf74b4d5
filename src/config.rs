//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RIVER__*` 覆盖（双下划线表示嵌套，如 `RIVER__HISTORY__WINDOW_SIZE=8`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::memory::OrphanPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub history: HistorySection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

/// [app] 段：用户档案文件、默认用户、会话 id 前缀、日志格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub profile_path: PathBuf,
    pub default_user: String,
    /// 会话 id 为 `{thread_prefix}_{user_id}`
    pub thread_prefix: String,
    pub log_format: LogFormat,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "river".to_string(),
            profile_path: PathBuf::from("user_profile.json"),
            default_user: "user_123".to_string(),
            thread_prefix: "riverline".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl AppSection {
    pub fn thread_id_for(&self, user_id: &str) -> String {
        format!("{}_{}", self.thread_prefix, user_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// [llm] 段：推理引擎后端、模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// groq / openai / mock；未找到 API Key 时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            base_url: None,
            temperature: 0.7,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
        }
    }
}

/// [history] 段：清洗窗口大小、孤立结果策略、单轮推理次数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub window_size: usize,
    pub orphan_policy: OrphanPolicy,
    /// 单轮内推理引擎调用次数上限（含工具循环）
    pub max_iterations: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            window_size: 10,
            orphan_policy: OrphanPolicy::Strict,
            max_iterations: 6,
        }
    }
}

/// [tools] 段：单次工具超时、远程档案服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub profile_server: ProfileServerSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            profile_server: ProfileServerSection::default(),
        }
    }
}

/// [tools.profile_server] 段：档案服务子进程命令（每次调用启动一次）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileServerSection {
    pub enabled: bool,
    /// 未设置时使用与当前可执行文件同目录的 river-profile-server
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ProfileServerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            args: Vec::new(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Postgres,
    Json,
    Memory,
}

/// [storage] 段：持久化后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub sqlite_path: PathBuf,
    pub json_dir: PathBuf,
    /// 未设置时读取环境变量 DATABASE_URL
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: PathBuf::from("memory.sqlite"),
            json_dir: PathBuf::from("threads"),
            database_url: None,
            max_connections: 20,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RIVER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RIVER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RIVER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.history.window_size, 10);
        assert_eq!(cfg.history.orphan_policy, OrphanPolicy::Strict);
        assert!((5..=10).contains(&cfg.history.max_iterations));
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.app.thread_id_for("user_123"), "riverline_user_123");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("river.toml");
        std::fs::write(
            &path,
            r#"
[history]
window_size = 3
orphan_policy = "leading"

[storage]
backend = "json"
json_dir = "/tmp/river-threads"
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.history.window_size, 3);
        assert_eq!(cfg.history.orphan_policy, OrphanPolicy::Leading);
        assert_eq!(cfg.history.max_iterations, 6);
        assert_eq!(cfg.storage.backend, StorageBackend::Json);
        assert_eq!(cfg.llm.model, "llama-3.3-70b-versatile");
    }
}
