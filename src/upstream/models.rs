//! OpenAI-compatible request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chat message in OpenAI format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request forwarded upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
    /// Caller's `Authorization` header, forwarded verbatim when present
    pub authorization: Option<String>,
}

/// Upstream answer
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResponse {
    /// Complete JSON body of a non-streaming completion
    Json(Value),
    /// Decoded `data:` events of a streaming completion
    Events(Vec<Value>),
}

impl UpstreamResponse {
    /// Content of the first choice of a non-streaming reply
    pub fn reply_content(&self) -> Option<&str> {
        match self {
            UpstreamResponse::Json(body) => body
                .get("choices")?
                .get(0)?
                .get("message")?
                .get("content")?
                .as_str(),
            UpstreamResponse::Events(_) => None,
        }
    }
}

/// Body sent to the provider
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}
