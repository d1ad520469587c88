use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::types::ContextWindow;
use crate::models::chat::{ChatTurn, ConversationId};

/// In-memory rolling context of every conversation seen since startup.
///
/// All windows sit behind one async mutex. A dispatch batch holds the
/// [`ContextGuard`] for its whole duration, backend calls included, so
/// batches never interleave.
pub struct ContextStore {
    windows: Mutex<HashMap<ConversationId, ContextWindow>>,
    capacity: usize,
}

impl ContextStore {
    pub fn new(capacity: usize) -> Self {
        info!("Initializing context store (window size {})", capacity);
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Enter the critical section
    pub async fn lock(&self) -> ContextGuard<'_> {
        ContextGuard {
            windows: self.windows.lock().await,
            capacity: self.capacity,
        }
    }

    pub async fn append(&self, conversation_id: &str, turn: ChatTurn) {
        self.lock().await.append(conversation_id, turn);
    }

    pub async fn snapshot(&self, conversation_id: &str, n: usize) -> Vec<ChatTurn> {
        self.lock().await.snapshot(conversation_id, n)
    }

    /// Number of known conversations
    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.windows.lock().await.is_empty()
    }
}

/// Exclusive access to the store for one processing cycle
pub struct ContextGuard<'a> {
    windows: MutexGuard<'a, HashMap<ConversationId, ContextWindow>>,
    capacity: usize,
}

impl ContextGuard<'_> {
    pub fn get_or_create(&mut self, conversation_id: &str) -> &mut ContextWindow {
        let capacity = self.capacity;
        self.windows
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!("New conversation window for {}", conversation_id);
                ContextWindow::new(capacity)
            })
    }

    pub fn append(&mut self, conversation_id: &str, turn: ChatTurn) {
        self.get_or_create(conversation_id).push(turn);
    }

    /// Last `n` turns of the conversation (empty if unknown)
    pub fn snapshot(&self, conversation_id: &str, n: usize) -> Vec<ChatTurn> {
        self.windows
            .get(conversation_id)
            .map(|w| w.last_n(n))
            .unwrap_or_default()
    }

    pub fn last_turn(&self, conversation_id: &str) -> Option<ChatTurn> {
        self.windows.get(conversation_id)?.last().cloned()
    }
}
