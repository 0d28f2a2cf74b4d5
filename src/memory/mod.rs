//! 记忆层：消息模型、历史清洗（有界窗口）、会话持久化

pub mod message;
pub mod persistence;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sanitizer;
pub mod sqlite;

pub use message::{normalize_history, normalize_message, Message, Role, ToolCall};
pub use persistence::{
    create_store_from_config, JsonFileThreadStore, MemoryThreadStore, StoreError, ThreadStore,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresThreadStore;
pub use sanitizer::{
    HistorySanitizer, OrphanPolicy, SanitizeMode, SanitizeReport, DROPPED_MARKER, INTERRUPTED_MARKER,
};
pub use sqlite::SqliteThreadStore;
