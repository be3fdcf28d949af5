//! Conversation history per session
//!
//! History lives in process memory for the lifetime of the service.

pub mod store;

pub use store::{ConversationStore, InMemoryConversationStore, Role, StoredMessage};
