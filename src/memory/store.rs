//! Session message store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub tokens: usize,
    pub created_at: DateTime<Utc>,
}

/// Storage of per-session conversation history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to a session
    async fn add_message(&self, session_id: &str, role: Role, content: &str, tokens: usize);

    /// Messages of a session in insertion order
    async fn messages(&self, session_id: &str) -> Vec<StoredMessage>;

    /// Message contents joined by newlines
    async fn context(&self, session_id: &str) -> String {
        self.messages(session_id)
            .await
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Delete all messages of a session
    async fn clear_session(&self, session_id: &str);
}

/// In-memory store keyed by session id
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: DashMap<String, Vec<StoredMessage>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn add_message(&self, session_id: &str, role: Role, content: &str, tokens: usize) {
        let message = StoredMessage {
            role,
            content: content.to_string(),
            tokens,
            created_at: Utc::now(),
        };
        let mut session = self.sessions.entry(session_id.to_string()).or_default();
        session.push(message);
        debug!(messages = session.len(), "Stored {:?} message", role);
    }

    async fn messages(&self, session_id: &str) -> Vec<StoredMessage> {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    async fn clear_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
