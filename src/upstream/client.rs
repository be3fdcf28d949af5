//! HTTP client for the upstream provider

use super::models::{ChatCompletionRequest, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Upstream errors
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream initialization error: {0}")]
    Initialization(String),

    #[error("Upstream network error: {0}")]
    Network(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// Upstream provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Provider base URL, e.g. `https://api.openai.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when the caller does not name one
    #[serde(default = "default_model")]
    pub model: String,

    /// Key used when the caller sends no `Authorization` header
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Chat completion forwarder
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn chat_completion(
        &self,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// Forwarder over reqwest
pub struct HttpUpstream {
    client: Client,
    config: UpstreamConfig,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Initialization(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn authorization(&self, caller: Option<String>) -> Option<String> {
        caller.filter(|h| !h.trim().is_empty()).or_else(|| {
            self.config.api_key.as_ref().map(|key| {
                let key = key.expose_secret();
                if key.starts_with("Bearer ") {
                    key.clone()
                } else {
                    format!("Bearer {}", key)
                }
            })
        })
    }
}

/// Decode a server-sent event body into its JSON payloads.
///
/// Blank lines, non-data lines and the final `[DONE]` marker are skipped.
pub fn parse_sse_events(body: &str) -> Result<Vec<Value>, UpstreamError> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .map(|data| {
            serde_json::from_str(data).map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn chat_completion(
        &self,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            stream: request.stream,
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Forwarding chat completion"
        );

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(authorization) = self.authorization(request.authorization) {
            req = req.header("Authorization", authorization);
        }

        let response = req
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Upstream request failed");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if request.stream {
            let text = response
                .text()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
            return Ok(UpstreamResponse::Events(parse_sse_events(&text)?));
        }

        let json = response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;
        Ok(UpstreamResponse::Json(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::models::ChatMessage;
    use serde_json::json;

    fn request(stream: bool, authorization: Option<&str>) -> UpstreamRequest {
        UpstreamRequest {
            messages: vec![ChatMessage::new("user", "hi")],
            model: "gpt-test".to_string(),
            stream,
            authorization: authorization.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_sse_events() {
        let body = "data: {\"delta\": \"hi\"}\n\n: keep-alive\ndata: [DONE]\n";
        let events = parse_sse_events(body).unwrap();
        assert_eq!(events, vec![json!({"delta": "hi"})]);
    }

    #[test]
    fn test_parse_sse_events_rejects_garbage() {
        assert!(parse_sse_events("data: {not json}").is_err());
    }

    #[tokio::test]
    async fn test_uses_configured_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-test",
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: format!("{}/", server.url()),
            api_key: Some(SecretString::new("secret".to_string())),
            ..Default::default()
        })
        .unwrap();

        let response = upstream.chat_completion(request(false, None)).await.unwrap();
        assert_eq!(response, UpstreamResponse::Json(json!({"ok": true})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_caller_authorization_wins() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer caller")
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: server.url(),
            api_key: Some(SecretString::new("secret".to_string())),
            ..Default::default()
        })
        .unwrap();

        upstream
            .chat_completion(request(false, Some("Bearer caller")))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_streams_events() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"delta\": \"hi\"}\n\ndata: [DONE]\n\n")
            .create_async()
            .await;

        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: server.url(),
            ..Default::default()
        })
        .unwrap();

        let response = upstream.chat_completion(request(true, None)).await.unwrap();
        assert_eq!(response, UpstreamResponse::Events(vec![json!({"delta": "hi"})]));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: server.url(),
            ..Default::default()
        })
        .unwrap();

        let err = upstream.chat_completion(request(false, None)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    }
}
