use serde::{Deserialize, Serialize};

/// Conversations are addressed by the partner's display name
pub type ConversationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a conversation's rolling context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Incoming,
    Outgoing,
    System,
    Other,
}

impl MessageKind {
    /// Map the chat client's record type (`sys`, `friend`, `self`, ...) to a kind.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "sys" | "system" => Self::System,
            "friend" | "incoming" => Self::Incoming,
            "self" | "outgoing" => Self::Outgoing,
            _ => Self::Other,
        }
    }

    /// Only messages from the partner count as user input.
    pub fn role(&self) -> Role {
        match self {
            Self::Incoming => Role::User,
            _ => Role::Assistant,
        }
    }
}

/// A message that arrived after the unread marker in the current poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub kind: MessageKind,
}

impl NewMessage {
    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.kind.role(),
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Generated,
    Fallback { reason: String },
}

/// Reply for one conversation of a dispatch batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub conversation_id: ConversationId,
    /// Most recent turn before the reply (the message being answered)
    pub originating: ChatTurn,
    pub reply_text: String,
    pub status: ReplyStatus,
}

impl ReplyOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self.status, ReplyStatus::Fallback { .. })
    }
}
