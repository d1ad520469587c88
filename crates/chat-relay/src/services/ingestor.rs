use tracing::{debug, error, warn};

use crate::client::{ChatClient, ClientError, RawConversation, RawSnapshot};
use crate::models::chat::{MessageKind, NewMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestState {
    Normal,
    AfterSentinel,
}

/// Extracts unread messages from a polled snapshot.
///
/// The chat client returns history together with unread messages and puts a
/// system record (the sentinel) in front of the unread part. State is rebuilt
/// on every call, so a conversation without a sentinel yields nothing.
#[derive(Debug, Clone)]
pub struct MessageIngestor {
    sentinel: String,
}

impl MessageIngestor {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// New messages of every conversation in the snapshot, in arrival order
    pub fn extract(&self, snapshot: &RawSnapshot) -> Vec<NewMessage> {
        snapshot
            .conversations
            .iter()
            .flat_map(|conversation| self.extract_conversation(conversation))
            .collect()
    }

    fn extract_conversation(&self, conversation: &RawConversation) -> Vec<NewMessage> {
        let mut state = IngestState::Normal;
        let mut fresh = Vec::new();

        for record in &conversation.messages {
            let kind = MessageKind::from_raw(&record.kind);

            match (state, kind) {
                (_, MessageKind::System) => {
                    if record.content == self.sentinel {
                        state = IngestState::AfterSentinel;
                    }
                }
                (IngestState::AfterSentinel, kind) => fresh.push(NewMessage {
                    conversation_id: conversation.who.clone(),
                    content: record.content.clone(),
                    kind,
                }),
                // Already delivered in an earlier cycle
                (IngestState::Normal, _) => {}
            }
        }

        if state == IngestState::Normal && !conversation.messages.is_empty() {
            debug!(
                "No unread marker for {}, skipping {} records",
                conversation.who,
                conversation.messages.len()
            );
        }

        fresh
    }

    /// Poll the client and extract new messages.
    ///
    /// Read faults are logged and reported as "nothing new"; only a lost
    /// connection is returned to the caller.
    pub async fn poll(&self, client: &dyn ChatClient) -> Result<Vec<NewMessage>, ClientError> {
        match client.poll_new_messages().await {
            Ok(snapshot) => {
                let messages = self.extract(&snapshot);
                if !messages.is_empty() {
                    debug!("Ingested {} new messages", messages.len());
                }
                Ok(messages)
            }
            Err(e) if e.is_connection_lost() => {
                error!("Chat client connection lost while polling: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!("Failed to read new messages: {}", e);
                Ok(Vec::new())
            }
        }
    }
}
