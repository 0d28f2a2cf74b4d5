//! SQLite 会话存储（嵌入式单文件，默认后端）
//!
//! rusqlite 为同步 API：连接放在 Mutex 中，读写通过 spawn_blocking 执行，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::persistence::{decode_messages, encode_messages};
use crate::memory::{Message, StoreError, ThreadStore};

pub struct SqliteThreadStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteThreadStore {
    /// 打开（或创建）数据库文件并建表
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path)?;
            init_tables(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(Self::from_connection(conn))
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_tables(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("sqlite connection mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn init_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS thread_checkpoints (
            thread_id TEXT PRIMARY KEY,
            messages TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let thread_id = thread_id.to_string();
        let data: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT messages FROM thread_checkpoints WHERE thread_id = ?1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match data {
            Some(data) => decode_messages(&data),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        let data = encode_messages(messages)?;
        let count = messages.len() as i64;
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO thread_checkpoints (thread_id, messages, message_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    messages = excluded.messages,
                    message_count = excluded.message_count,
                    updated_at = excluded.updated_at",
                params![thread_id, data, count, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM thread_checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
