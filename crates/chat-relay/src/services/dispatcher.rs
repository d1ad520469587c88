use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::conversation::{ContextGuard, ContextStore};
use crate::config::PromptsConfig;
use crate::models::chat::{ChatTurn, ConversationId, NewMessage, ReplyOutcome, ReplyStatus};
use crate::utils::error::RelayError;

/// Language-model backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, turns: &[ChatTurn]) -> Result<String, RelayError>;
}

/// Turns a batch of new messages into one reply per conversation.
pub struct ReplyDispatcher {
    store: Arc<ContextStore>,
    llm: Arc<dyn LlmProvider>,
    prompts: PromptsConfig,
    prompt_turns: usize,
}

impl ReplyDispatcher {
    pub fn new(
        store: Arc<ContextStore>,
        llm: Arc<dyn LlmProvider>,
        prompts: PromptsConfig,
        prompt_turns: usize,
    ) -> Self {
        Self {
            store,
            llm,
            prompts,
            prompt_turns,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Record the batch in the context store and query the backend once per
    /// conversation. The store stays locked until every conversation is done.
    pub async fn dispatch(&self, messages: &[NewMessage]) -> Vec<ReplyOutcome> {
        if messages.is_empty() {
            return Vec::new();
        }

        let mut guard = self.store.lock().await;

        for message in messages {
            guard.append(&message.conversation_id, message.to_turn());
        }

        let conversations = distinct_conversations(messages);
        debug!(
            "Dispatching {} messages across {} conversations",
            messages.len(),
            conversations.len()
        );

        let mut outcomes = Vec::with_capacity(conversations.len());
        for conversation_id in conversations {
            if let Some(outcome) = self.reply_to(&mut guard, conversation_id).await {
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    async fn reply_to(
        &self,
        guard: &mut ContextGuard<'_>,
        conversation_id: ConversationId,
    ) -> Option<ReplyOutcome> {
        let originating = guard.last_turn(&conversation_id)?;
        let system_prompt = self.prompts.system_prompt_for(&conversation_id);
        let turns = guard.snapshot(&conversation_id, self.prompt_turns);

        let started = Instant::now();
        match self.llm.complete(&system_prompt, &turns).await {
            Ok(reply) => {
                info!(
                    "Generated reply for {} in {:?} ({} chars)",
                    conversation_id,
                    started.elapsed(),
                    reply.chars().count()
                );
                guard.append(&conversation_id, ChatTurn::assistant(reply.clone()));

                Some(ReplyOutcome {
                    conversation_id,
                    originating,
                    reply_text: reply,
                    status: ReplyStatus::Generated,
                })
            }
            Err(e) => {
                error!("LLM request failed for {}: {}", conversation_id, e);
                warn!("Sending fallback reply to {}", conversation_id);

                Some(ReplyOutcome {
                    conversation_id,
                    originating,
                    reply_text: self.prompts.fallback_reply.clone(),
                    status: ReplyStatus::Fallback {
                        reason: e.to_string(),
                    },
                })
            }
        }
    }
}

/// Conversation ids in order of first appearance
fn distinct_conversations(messages: &[NewMessage]) -> Vec<ConversationId> {
    let mut seen: Vec<ConversationId> = Vec::new();
    for message in messages {
        if !seen.contains(&message.conversation_id) {
            seen.push(message.conversation_id.clone());
        }
    }
    seen
}
