//! 会话持久化：按 thread_id 存取完整消息序列
//!
//! ThreadStore 是唯一的持久化接口，后端由配置选择：
//! - sqlite：嵌入式单文件（默认）
//! - postgres：网络存储（需 `postgres` feature）
//! - json：每个会话一个 JSON 文件
//! - memory：进程内（测试用）
//!
//! 所有后端读取时都经过 `normalize_history`，历史记录中格式不合法的条目不会中断对话。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{StorageBackend, StorageSection};
use crate::memory::{normalize_history, Message};

/// 持久化错误：必须向调用方暴露，不能静默吞掉
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// 会话存储接口：load 不存在的会话返回空序列
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Vec<Message>, StoreError>;

    /// 以完整序列覆盖该会话（last-writer-wins）
    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}

/// 把存储的 JSON 文本解析为消息序列（宽松）
pub(crate) fn decode_messages(data: &str) -> Result<Vec<Message>, StoreError> {
    let raw: serde_json::Value = serde_json::from_str(data)?;
    Ok(normalize_history(&raw))
}

pub(crate) fn encode_messages(messages: &[Message]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(messages)?)
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.threads
            .write()
            .await
            .insert(thread_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// JSON 文件存储：目录下每个会话一个 `<编码后的 thread_id>.json`
#[derive(Debug)]
pub struct JsonFileThreadStore {
    dir: PathBuf,
}

impl JsonFileThreadStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(thread_id)))
    }
}

/// 可逆的文件名编码：字母数字与 `-` 原样保留，其余字节（含 `_`）写作 `_xx`。
/// 不同 thread_id 必然得到不同文件名，且无法逃逸出目录。
fn encode_file_stem(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{b:02x}"));
        }
    }
    out
}

#[async_trait]
impl ThreadStore for JsonFileThreadStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.path_for(thread_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        decode_messages(&data)
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(thread_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(messages)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        let path = self.path_for(thread_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}

/// 根据 [storage] 配置创建存储后端
///
/// 与本地 / 云端混合部署一致：`DATABASE_URL` 含 postgres 时优先使用 Postgres。
pub async fn create_store_from_config(cfg: &StorageSection) -> Result<Arc<dyn ThreadStore>, StoreError> {
    let database_url = cfg
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .filter(|url| !url.trim().is_empty());
    let backend = match (&cfg.backend, &database_url) {
        (StorageBackend::Sqlite, Some(url)) if url.contains("postgres") => StorageBackend::Postgres,
        (backend, _) => backend.clone(),
    };

    match backend {
        StorageBackend::Sqlite => {
            tracing::info!(path = %cfg.sqlite_path.display(), "Using local database (SQLite)");
            let store = crate::memory::SqliteThreadStore::open(&cfg.sqlite_path).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let url = database_url
                .ok_or_else(|| StoreError::Config("postgres backend requires database_url".into()))?;
            create_postgres_store(&url, cfg.max_connections).await
        }
        StorageBackend::Json => {
            tracing::info!(dir = %cfg.json_dir.display(), "Using JSON file thread store");
            Ok(Arc::new(JsonFileThreadStore::new(&cfg.json_dir)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory thread store; history is lost on exit");
            Ok(Arc::new(MemoryThreadStore::new()))
        }
    }
}

#[cfg(feature = "postgres")]
async fn create_postgres_store(url: &str, max_connections: u32) -> Result<Arc<dyn ThreadStore>, StoreError> {
    tracing::info!("Using cloud database (PostgreSQL)");
    let store = crate::memory::PostgresThreadStore::connect(url, max_connections).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn create_postgres_store(_url: &str, _max_connections: u32) -> Result<Arc<dyn ThreadStore>, StoreError> {
    Err(StoreError::Config(
        "postgres backend requested but the crate was built without the `postgres` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Vec<Message> {
        vec![
            Message::user("I owe ₹12000"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "check_settlement_policy", json!({"debt_amount": 12000}))],
            ),
            Message::tool_result("c1", "max 20%"),
            Message::assistant("We can offer 20% off."),
        ]
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryThreadStore::new();
        let messages = sample();
        assert!(store.load("t1").await.unwrap().is_empty());
        store.save("t1", &messages).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), messages);
        store.delete("t1").await.unwrap();
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_json_store_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileThreadStore::new(dir.path().join("threads"));
        let messages = sample();

        assert!(store.load("riverline_user_123").await.unwrap().is_empty());
        store.save("riverline_user_123", &messages).await.unwrap();
        assert_eq!(store.load("riverline_user_123").await.unwrap(), messages);

        store.delete("riverline_user_123").await.unwrap();
        store.delete("riverline_user_123").await.unwrap();
        assert!(store.load("riverline_user_123").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_encodes_thread_id() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileThreadStore::new(dir.path());
        store.save("../escape", &sample()).await.unwrap();
        assert!(dir.path().join("_2e_2e_2fescape.json").exists());
        assert_eq!(encode_file_stem("riverline_user_1"), "riverline_5fuser_5f1");
    }

    #[tokio::test]
    async fn test_json_store_ids_differing_in_special_char_stay_separate() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileThreadStore::new(dir.path());
        store.save("riverline_user.1", &[Message::user("alice secret")]).await.unwrap();
        store.save("riverline_user_1", &[Message::user("bob")]).await.unwrap();

        assert_eq!(store.load("riverline_user.1").await.unwrap()[0].content, "alice secret");
        assert_eq!(store.load("riverline_user_1").await.unwrap()[0].content, "bob");
        store.delete("riverline_user_1").await.unwrap();
        assert_eq!(store.load("riverline_user.1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_tolerates_loose_records() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("legacy.json"),
            r#"{"messages": [{"type": "human", "content": "hello"}, 7, {"type": "ai", "content": "hi"}]}"#,
        )
        .unwrap();
        let store = JsonFileThreadStore::new(dir.path());
        let loaded = store.load("legacy").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].content, "hi");
    }

    #[tokio::test]
    async fn test_factory_memory_backend() {
        let cfg = StorageSection {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let store = create_store_from_config(&cfg).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
