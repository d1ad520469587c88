use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tracing::debug;

use super::models::ChatRecord;
use super::DbPool;

/// Durable record of delivered replies
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn record(
        &self,
        conversation_id: &str,
        display_name: &str,
        original_message: &str,
        reply_text: &str,
    ) -> Result<i64>;
}

pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the history table and its index if missing
    pub async fn init_schema(&self) -> Result<()> {
        // sender_id is the conversation id, sender_name the display name
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                message TEXT NOT NULL,
                reply TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        // Dashboard lists newest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_created_at ON chat_messages (created_at)",
        )
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn insert_message(
        &self,
        sender_id: &str,
        sender_name: &str,
        message: &str,
        reply: &str,
        created_at: NaiveDateTime,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO chat_messages (sender_id, sender_name, message, reply, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(sender_id)
        .bind(sender_name)
        .bind(message)
        .bind(reply)
        .bind(created_at)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All exchanges, most recent first
    pub async fn list_messages(&self) -> Result<Vec<ChatRecord>> {
        let records = sqlx::query_as::<_, ChatRecord>(
            r#"SELECT id, sender_id, sender_name, message, reply, created_at
               FROM chat_messages
               ORDER BY created_at DESC, id DESC"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Loaded {} chat records", records.len());
        Ok(records)
    }
}

#[async_trait]
impl PersistenceSink for Repository {
    async fn record(
        &self,
        conversation_id: &str,
        display_name: &str,
        original_message: &str,
        reply_text: &str,
    ) -> Result<i64> {
        self.insert_message(
            conversation_id,
            display_name,
            original_message,
            reply_text,
            Local::now().naive_local(),
        )
        .await
    }
}
