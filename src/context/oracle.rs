//! Relevance oracles: per-token scoring against a query
//!
//! The reducer only depends on the [`RelevanceOracle`] contract: one score per
//! token position, or an explicit "unavailable" answer that routes the call to
//! the head/tail fallback.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::tokenizer::{TokenId, Tokenizer};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Why no relevance scores were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No scoring adapter configured
    NotConfigured,
    /// The adapter exists but exposes no usable relevance signal
    NoSignal,
    /// Remote scorer skipped after repeated failures
    CircuitOpen,
    /// Scorer exceeded its time budget
    Timeout,
    /// Scorer returned an error
    Failed,
    /// Scorer returned a vector not aligned with the tokens
    Misaligned,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::NotConfigured => "not_configured",
            UnavailableReason::NoSignal => "no_signal",
            UnavailableReason::CircuitOpen => "circuit_open",
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::Failed => "failed",
            UnavailableReason::Misaligned => "misaligned",
        }
    }
}

/// Oracle answer for one call
#[derive(Debug, Clone, PartialEq)]
pub enum Relevance {
    /// One score per token, higher is more relevant
    Scored(Vec<f32>),
    Unavailable(UnavailableReason),
}

/// Oracle errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Relevance scoring capability
#[async_trait]
pub trait RelevanceOracle: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Score every position of `tokens` (query, separator and context) for
    /// relevance to `query`. `tokenizer` is the session that produced the ids.
    async fn score(
        &self,
        query: &str,
        tokens: &[TokenId],
        tokenizer: &dyn Tokenizer,
    ) -> Result<Relevance, OracleError>;
}

/// Oracle used when no scorer is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOracle;

#[async_trait]
impl RelevanceOracle for UnavailableOracle {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn score(
        &self,
        _query: &str,
        _tokens: &[TokenId],
        _tokenizer: &dyn Tokenizer,
    ) -> Result<Relevance, OracleError> {
        Ok(Relevance::Unavailable(UnavailableReason::NotConfigured))
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// In-process scorer based on keyword overlap with the query.
///
/// A token whose text equals a query word scores 1.0, a token that is part of
/// a query word (or contains one) scores 0.5, anything else 0.0.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalOracle;

impl LexicalOracle {
    fn score_token(
        id: TokenId,
        tokenizer: &dyn Tokenizer,
        query_words: &HashSet<String>,
    ) -> f32 {
        let Ok(text) = tokenizer.decode(&[id]) else {
            return 0.0;
        };
        let word = normalize(&text);
        if word.is_empty() {
            return 0.0;
        }
        if query_words.contains(&word) {
            return 1.0;
        }
        let partial = query_words.iter().any(|q| {
            (word.len() >= 3 && q.contains(word.as_str()))
                || (q.len() >= 3 && word.contains(q.as_str()))
        });
        if partial {
            0.5
        } else {
            0.0
        }
    }
}

#[async_trait]
impl RelevanceOracle for LexicalOracle {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn score(
        &self,
        query: &str,
        tokens: &[TokenId],
        tokenizer: &dyn Tokenizer,
    ) -> Result<Relevance, OracleError> {
        let query_words: HashSet<String> = query
            .split_whitespace()
            .map(normalize)
            .filter(|w| !w.is_empty())
            .collect();

        if query_words.is_empty() {
            return Ok(Relevance::Unavailable(UnavailableReason::NoSignal));
        }

        let scores = tokens
            .iter()
            .map(|&id| Self::score_token(id, tokenizer, &query_words))
            .collect();
        Ok(Relevance::Scored(scores))
    }
}

/// Configuration for the remote scorer
#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090/v1/relevance".to_string(),
            api_key: None,
            timeout: Duration::from_secs(2),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    query: &'a str,
    tokens: &'a [TokenId],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    #[serde(default = "default_available")]
    available: bool,
    #[serde(default)]
    scores: Option<Vec<f32>>,
}

fn default_available() -> bool {
    true
}

/// Model-backed scorer reached over HTTP
pub struct HttpRelevanceOracle {
    client: Client,
    config: HttpOracleConfig,
    breaker: CircuitBreaker,
}

impl HttpRelevanceOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Initialization(e.to_string()))?;
        let breaker = CircuitBreaker::new(config.breaker.clone());

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn request_scores(
        &self,
        query: &str,
        tokens: &[TokenId],
    ) -> Result<Relevance, OracleError> {
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .json(&ScoreRequest { query, tokens });

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
        }

        let response = req
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        match parsed.scores {
            Some(scores) if parsed.available => Ok(Relevance::Scored(scores)),
            _ => Ok(Relevance::Unavailable(UnavailableReason::NoSignal)),
        }
    }
}

#[async_trait]
impl RelevanceOracle for HttpRelevanceOracle {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn score(
        &self,
        query: &str,
        tokens: &[TokenId],
        _tokenizer: &dyn Tokenizer,
    ) -> Result<Relevance, OracleError> {
        if self.breaker.is_open() {
            debug!("Relevance scorer circuit open, skipping call");
            return Ok(Relevance::Unavailable(UnavailableReason::CircuitOpen));
        }

        match self.request_scores(query, tokens).await {
            Ok(relevance) => {
                self.breaker.mark_success();
                Ok(relevance)
            }
            Err(e) => {
                warn!("Relevance scorer call failed: {}", e);
                self.breaker.mark_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokenizer::WordTokenizer;

    #[tokio::test]
    async fn test_unavailable_oracle() {
        let relevance = UnavailableOracle
            .score("q", &[1, 2, 3], &WordTokenizer::new())
            .await
            .unwrap();
        assert_eq!(
            relevance,
            Relevance::Unavailable(UnavailableReason::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_lexical_oracle_scores_overlap() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("the Rust compiler, async runtimes").unwrap();

        let relevance = LexicalOracle
            .score("rust async", &tokens, &tokenizer)
            .await
            .unwrap();
        let Relevance::Scored(scores) = relevance else {
            panic!("expected scores");
        };
        assert_eq!(scores, vec![0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_lexical_oracle_partial_match() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("compile compilers").unwrap();

        let relevance = LexicalOracle
            .score("compiler", &tokens, &tokenizer)
            .await
            .unwrap();
        let Relevance::Scored(scores) = relevance else {
            panic!("expected scores");
        };
        assert_eq!(scores, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_lexical_oracle_without_query_words() {
        let tokenizer = WordTokenizer::new();
        let tokens = tokenizer.encode("anything").unwrap();

        let relevance = LexicalOracle.score("  ?! ", &tokens, &tokenizer).await.unwrap();
        assert_eq!(relevance, Relevance::Unavailable(UnavailableReason::NoSignal));
    }

    #[tokio::test]
    async fn test_http_oracle_returns_scores() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/relevance")
            .match_header("authorization", "Bearer scorer-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"available": true, "scores": [0.1, 0.9]}"#)
            .create_async()
            .await;

        let oracle = HttpRelevanceOracle::new(HttpOracleConfig {
            endpoint: format!("{}/v1/relevance", server.url()),
            api_key: Some(SecretString::new("scorer-key".to_string())),
            ..Default::default()
        })
        .unwrap();

        let relevance = oracle.score("q", &[1, 2], &WordTokenizer::new()).await.unwrap();
        assert_eq!(relevance, Relevance::Scored(vec![0.1, 0.9]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_oracle_without_signal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/relevance")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"available": false}"#)
            .create_async()
            .await;

        let oracle = HttpRelevanceOracle::new(HttpOracleConfig {
            endpoint: format!("{}/v1/relevance", server.url()),
            ..Default::default()
        })
        .unwrap();

        let relevance = oracle.score("q", &[1], &WordTokenizer::new()).await.unwrap();
        assert_eq!(relevance, Relevance::Unavailable(UnavailableReason::NoSignal));
    }

    #[tokio::test]
    async fn test_http_oracle_opens_circuit_after_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/relevance")
            .with_status(500)
            .with_body("boom")
            .expect(2)
            .create_async()
            .await;

        let oracle = HttpRelevanceOracle::new(HttpOracleConfig {
            endpoint: format!("{}/v1/relevance", server.url()),
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
            ..Default::default()
        })
        .unwrap();

        assert!(oracle.score("q", &[1], &WordTokenizer::new()).await.is_err());
        assert!(oracle.score("q", &[1], &WordTokenizer::new()).await.is_err());
        let relevance = oracle.score("q", &[1], &WordTokenizer::new()).await.unwrap();
        assert_eq!(
            relevance,
            Relevance::Unavailable(UnavailableReason::CircuitOpen)
        );
    }
}
