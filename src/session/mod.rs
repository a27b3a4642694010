//! Conversation history persistence and its cleanup task.

mod janitor;
mod store;

pub use janitor::SessionJanitor;
pub use store::{validate_session_id, Conversation, ConversationMessage, ConversationStore, Role};
