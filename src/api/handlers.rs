//! Proxy API handlers

use crate::auth::{self, ApiKeyAuthenticator, Identity, API_KEY_HEADER};
use crate::config::Config;
use crate::context::ContextReducer;
use crate::error::{Error, Result};
use crate::memory::{ConversationStore, InMemoryConversationStore, Role};
use crate::metrics::METRICS;
use crate::quota::RateLimiter;
use crate::time_operation;
use crate::upstream::{ChatMessage, HttpUpstream, UpstreamClient, UpstreamRequest, UpstreamResponse};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Header naming the conversation to attach history to
pub const SESSION_HEADER: &str = "x-session-id";

pub const TOKENS_BEFORE_HEADER: &str = "x-tokens-before";
pub const TOKENS_AFTER_HEADER: &str = "x-tokens-after";
pub const TOKENS_SAVED_HEADER: &str = "x-tokens-saved";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<ApiKeyAuthenticator>,
    pub limiter: Arc<RateLimiter>,
    pub reducer: Arc<ContextReducer>,
    pub store: Arc<dyn ConversationStore>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub default_model: String,
}

impl AppState {
    /// Wire every component from one configuration snapshot
    pub fn from_config(config: &Config) -> Result<Self> {
        let reducer = ContextReducer::from_config(&config.compression)?;
        let upstream = HttpUpstream::new(config.upstream.clone())?;

        Ok(Self {
            authenticator: Arc::new(ApiKeyAuthenticator::from_csv(&config.auth.api_keys)),
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            reducer: Arc::new(reducer),
            store: Arc::new(InMemoryConversationStore::new()),
            upstream: Arc::new(upstream),
            default_model: config.upstream.model.clone(),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn message_content(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Session id as it may appear in logs. Without `X-Session-ID` the session
/// id is the caller's API key.
fn session_log_key(session_id: &str) -> String {
    auth::fingerprint(session_id)
}

/// Validated chat completion body
struct ChatPayload {
    messages: Vec<ChatMessage>,
    model: Option<String>,
    stream: bool,
}

impl ChatPayload {
    fn parse(body: &[u8]) -> Result<Self> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|_| Error::InvalidRequest("Invalid JSON payload".to_string()))?;

        let raw = payload
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Unprocessable("'messages' must be a list".to_string()))?;

        let last = raw
            .last()
            .ok_or_else(|| Error::Unprocessable("No messages provided".to_string()))?;
        if last.get("role").and_then(Value::as_str) != Some("user") {
            return Err(Error::Unprocessable(
                "Last message must have role 'user'".to_string(),
            ));
        }

        let messages = raw
            .iter()
            .map(|m| {
                let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                ChatMessage::new(role, message_content(m))
            })
            .collect();

        Ok(Self {
            messages,
            model: payload
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
            stream: payload
                .get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn query(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Chat completions in OpenAI format
///
/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = info_span!("chat_completion", request_id = %Uuid::new_v4());
    match handle_chat(&state, &headers, &body).instrument(span).await {
        Ok(response) => {
            METRICS.record_chat_request("success");
            response
        }
        Err(e) => {
            info!(code = e.code(), "Chat completion rejected: {}", e);
            METRICS.record_chat_request(e.code());
            e.into_response()
        }
    }
}

async fn handle_chat(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    let identity: Identity = state
        .authenticator
        .authenticate(header_str(headers, API_KEY_HEADER))?;

    let payload = ChatPayload::parse(body)?;

    let session_id = header_str(headers, SESSION_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if identity.is_anonymous() {
                "anonymous".to_string()
            } else {
                identity.as_str().to_string()
            }
        });

    let context = state.store.context(&session_id).await;
    let query = payload.query().to_string();
    let reduction = state.reducer.reduce(&query, &context, None).await?;

    // Quota is charged on the pre-compression size
    let admission = state.limiter.check(identity.as_str(), reduction.tokens_before);
    METRICS.record_rate_limit(admission.as_ref().err().map(|e| e.resource.as_str()));
    admission?;

    info!(
        identity = %identity,
        tokens_before = reduction.tokens_before,
        tokens_after = reduction.tokens_after,
        strategy = reduction.strategy.as_str(),
        "Request admitted"
    );

    let mut upstream_messages = Vec::with_capacity(payload.messages.len() + 1);
    if !reduction.condensed.is_empty() {
        upstream_messages.push(ChatMessage::new("system", reduction.condensed.clone()));
    }
    upstream_messages.extend(payload.messages.iter().cloned());

    let request = UpstreamRequest {
        messages: upstream_messages,
        model: payload.model.clone().unwrap_or_else(|| state.default_model.clone()),
        stream: payload.stream,
        authorization: header_str(headers, header::AUTHORIZATION.as_str()).map(str::to_string),
    };

    let stream_label = if payload.stream { "true" } else { "false" };
    let result = time_operation!(
        METRICS.upstream_duration,
        stream_label,
        state.upstream.chat_completion(request).await
    )?;

    state
        .store
        .add_message(&session_id, Role::User, &query, reduction.tokens_after)
        .await;
    if let Some(reply) = result.reply_content() {
        let reply_tokens = reply.split_whitespace().count();
        state
            .store
            .add_message(&session_id, Role::Assistant, reply, reply_tokens)
            .await;
    }
    debug!(session = %session_log_key(&session_id), "Conversation updated");

    let mut response = match result {
        UpstreamResponse::Json(body) => (StatusCode::OK, Json(body)).into_response(),
        UpstreamResponse::Events(events) => {
            let mut sse = String::new();
            for event in &events {
                sse.push_str("data: ");
                sse.push_str(&event.to_string());
                sse.push_str("\n\n");
            }
            sse.push_str("data: [DONE]\n\n");
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from(sse))
                .map_err(|e| Error::Internal(e.to_string()))?
        }
    };

    let headers = response.headers_mut();
    headers.insert(TOKENS_BEFORE_HEADER, HeaderValue::from(reduction.tokens_before));
    headers.insert(TOKENS_AFTER_HEADER, HeaderValue::from(reduction.tokens_after));
    headers.insert(TOKENS_SAVED_HEADER, HeaderValue::from(reduction.tokens_saved()));

    Ok(response)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_requires_message_list() {
        let err = ChatPayload::parse(br#"{"messages": "hi"}"#).err().unwrap();
        assert!(matches!(err, Error::Unprocessable(_)));
    }

    #[test]
    fn test_payload_rejects_invalid_json() {
        let err = ChatPayload::parse(b"{not json").err().unwrap();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_payload_requires_trailing_user_message() {
        let err = ChatPayload::parse(br#"{"messages": []}"#).err().unwrap();
        assert!(matches!(err, Error::Unprocessable(_)));

        let err = ChatPayload::parse(
            br#"{"messages": [{"role": "assistant", "content": "hello"}]}"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Unprocessable(_)));
    }

    #[test]
    fn test_session_log_key_hides_api_key() {
        let key = session_log_key("sk-live-1234567890");
        assert_eq!(key.len(), 8);
        assert!(!key.contains("sk-live"));
        assert_eq!(key, session_log_key("sk-live-1234567890"));
    }

    #[test]
    fn test_payload_fields() {
        let payload = ChatPayload::parse(
            br#"{"model": "m1", "stream": true,
                 "messages": [{"role": "system", "content": "be brief"},
                              {"role": "user", "content": "what is rust?"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.model.as_deref(), Some("m1"));
        assert!(payload.stream);
        assert_eq!(payload.messages.len(), 2);
        assert_eq!(payload.query(), "what is rust?");
    }
}
