//! PostgreSQL 会话存储（网络存储，需要 `postgres` feature）
//!
//! 连接池参数面向 Serverless Postgres：min_connections = 0，连接定期回收，取用前 ping。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::memory::persistence::{decode_messages, encode_messages};
use crate::memory::{Message, StoreError, ThreadStore};

pub struct PostgresThreadStore {
    pool: PgPool,
}

impl PostgresThreadStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections.max(1))
            .max_lifetime(Duration::from_secs(60))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS thread_checkpoints (
                thread_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                message_count BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for PostgresThreadStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let row = sqlx::query("SELECT messages FROM thread_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("messages")?;
                decode_messages(&data)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, thread_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let data = encode_messages(messages)?;
        sqlx::query(
            "INSERT INTO thread_checkpoints (thread_id, messages, message_count, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (thread_id) DO UPDATE SET
                messages = EXCLUDED.messages,
                message_count = EXCLUDED.message_count,
                updated_at = now()",
        )
        .bind(thread_id)
        .bind(data)
        .bind(messages.len() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM thread_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
