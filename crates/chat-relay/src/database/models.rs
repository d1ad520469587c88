use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One recorded exchange (incoming message + reply)
#[derive(Debug, Clone, FromRow)]
pub struct ChatRecord {
    pub id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub message: String,
    pub reply: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatRecordView {
    pub id: i64,
    pub sender_name: String,
    pub message: String,
    pub reply: String,
    pub created_at: String,
}

impl From<ChatRecord> for ChatRecordView {
    fn from(record: ChatRecord) -> Self {
        Self {
            id: record.id,
            sender_name: record.sender_name,
            message: record.message,
            reply: record.reply,
            created_at: record.created_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}
