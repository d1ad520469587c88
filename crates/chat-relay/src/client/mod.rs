//! Chat-client binding.
//!
//! The relay only needs four capabilities from the desktop chat client:
//! validate the session, register listeners, poll the listened conversations
//! and send a message. [`BridgeConnector`] talks to a local HTTP sidecar that
//! drives the real client.

mod bridge;

pub use bridge::{BridgeClient, BridgeConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Chat client disconnected: {0}")]
    Disconnected(String),

    #[error("Chat client transport error: {0}")]
    Transport(String),

    #[error("Chat client rejected request: {0}")]
    Rejected(String),

    #[error("Malformed chat client payload: {0}")]
    Malformed(String),
}

impl ClientError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::Disconnected(_))
    }
}

/// One record of a polled conversation, history included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sender: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RawRecord {
    pub fn new(sender: impl Into<String>, content: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConversation {
    pub who: String,
    #[serde(default)]
    pub messages: Vec<RawRecord>,
}

/// Everything pending for the listened conversations, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub conversations: Vec<RawConversation>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Used only to validate connectivity after login
    async fn list_sessions(&self) -> Result<bool, ClientError>;

    async fn add_listener(&self, conversation_id: &str) -> Result<(), ClientError>;

    async fn poll_new_messages(&self) -> Result<RawSnapshot, ClientError>;

    async fn send_message(&self, text: &str, conversation_id: &str) -> Result<(), ClientError>;
}

/// Establishes a chat-client session
#[async_trait]
pub trait ChatConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ChatClient>, ClientError>;
}
