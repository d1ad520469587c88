//! Per-conversation rolling context

mod store;
pub mod types;

pub use store::{ContextGuard, ContextStore};
pub use types::ContextWindow;
