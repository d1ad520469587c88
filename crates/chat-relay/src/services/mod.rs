pub mod conversation;
pub mod dispatcher;
pub mod ingestor;
pub mod llm_service;

pub use conversation::ContextStore;
pub use dispatcher::{LlmProvider, ReplyDispatcher};
pub use ingestor::MessageIngestor;
pub use llm_service::LlmService;
