//! Context reducer: bounds conversation history to `top_k` tokens
//!
//! The query, a fixed separator and the context are tokenized as one
//! sequence. With relevance scores available, the highest-scoring context
//! tokens survive; otherwise the head and tail of the context are kept.
//! Surviving tokens are always emitted in their original reading order.

use super::circuit_breaker::CircuitBreakerConfig;
use super::models::{ReductionResult, ReductionStrategy, CONTEXT_SEPARATOR};
use super::oracle::{
    HttpOracleConfig, HttpRelevanceOracle, LexicalOracle, Relevance, RelevanceOracle,
    UnavailableOracle, UnavailableReason,
};
use super::selection::{head_tail_positions, top_k_positions};
use super::tokenizer::{TiktokenTokenizer, TokenId, TokenizeError, Tokenizer, WordTokenizer};
use crate::metrics::METRICS;
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Which tokenizer to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    Tiktoken,
    Word,
}

/// Which relevance oracle to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    None,
    Lexical,
    Http,
}

/// Reducer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReducerConfig {
    /// Tokens kept when the caller does not ask for a specific amount
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_tokenizer")]
    pub tokenizer: TokenizerKind,

    #[serde(default = "default_oracle")]
    pub oracle: OracleKind,

    /// Time budget for one oracle call
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,

    #[serde(default)]
    pub oracle_endpoint: Option<String>,

    #[serde(default)]
    pub oracle_api_key: Option<SecretString>,
}

fn default_top_k() -> usize {
    64
}

fn default_tokenizer() -> TokenizerKind {
    TokenizerKind::Tiktoken
}

fn default_oracle() -> OracleKind {
    OracleKind::None
}

fn default_oracle_timeout_ms() -> u64 {
    2000
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            tokenizer: default_tokenizer(),
            oracle: default_oracle(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            oracle_endpoint: None,
            oracle_api_key: None,
        }
    }
}

impl ReducerConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

/// Reduction errors
#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Tokenization failed: {0}")]
    Tokenization(#[from] TokenizeError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Relevance-ranked context reducer
pub struct ContextReducer {
    tokenizer: Arc<dyn Tokenizer>,
    oracle: Arc<dyn RelevanceOracle>,
    top_k: usize,
    oracle_timeout: Duration,
}

impl ContextReducer {
    /// Create a reducer from explicit parts
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        oracle: Arc<dyn RelevanceOracle>,
        top_k: usize,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            tokenizer,
            oracle,
            top_k,
            oracle_timeout,
        }
    }

    /// Build tokenizer and oracle from configuration.
    ///
    /// Falls back to the word tokenizer when tiktoken cannot be loaded.
    pub fn from_config(config: &ReducerConfig) -> Result<Self, ReduceError> {
        if config.top_k == 0 {
            return Err(ReduceError::InvalidTopK);
        }

        let tokenizer: Arc<dyn Tokenizer> = match config.tokenizer {
            TokenizerKind::Tiktoken => TiktokenTokenizer::new()
                .map(|t| Arc::new(t) as Arc<dyn Tokenizer>)
                .unwrap_or_else(|e| {
                    warn!("tiktoken initialization failed ({}), falling back to word tokenizer", e);
                    Arc::new(WordTokenizer::new())
                }),
            TokenizerKind::Word => Arc::new(WordTokenizer::new()),
        };

        let oracle: Arc<dyn RelevanceOracle> = match config.oracle {
            OracleKind::None => Arc::new(UnavailableOracle),
            OracleKind::Lexical => Arc::new(LexicalOracle),
            OracleKind::Http => {
                let endpoint = config.oracle_endpoint.clone().ok_or_else(|| {
                    ReduceError::Configuration(
                        "oracle_endpoint is required for the http oracle".to_string(),
                    )
                })?;
                let oracle = HttpRelevanceOracle::new(HttpOracleConfig {
                    endpoint,
                    api_key: config.oracle_api_key.clone(),
                    timeout: config.oracle_timeout(),
                    breaker: CircuitBreakerConfig::default(),
                })
                .map_err(|e| ReduceError::Configuration(e.to_string()))?;
                Arc::new(oracle)
            }
        };

        info!(
            top_k = config.top_k,
            oracle = oracle.name(),
            "Context reducer configured"
        );

        Ok(Self::new(tokenizer, oracle, config.top_k, config.oracle_timeout()))
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    /// Condense `context` to at most `top_k` tokens relevant to `query`.
    ///
    /// `tokens_before` is the length of the joint query + separator + context
    /// encoding. Selection works on the segments encoded one by one, which
    /// pins the exact context range.
    pub async fn reduce(
        &self,
        query: &str,
        context: &str,
        top_k: Option<usize>,
    ) -> Result<ReductionResult, ReduceError> {
        let top_k = top_k.unwrap_or(self.top_k);
        if top_k == 0 {
            return Err(ReduceError::InvalidTopK);
        }

        let tokenizer = self.tokenizer.session();

        let joined = format!("{}{}{}", query, CONTEXT_SEPARATOR, context);
        let tokens_before = tokenizer.count(&joined)?;

        let query_ids = tokenizer.encode(query)?;
        let separator_ids = tokenizer.encode(CONTEXT_SEPARATOR)?;
        let context_ids = tokenizer.encode(context)?;

        let context_start = query_ids.len() + separator_ids.len();
        let context_len = context_ids.len();

        let mut tokens: Vec<TokenId> = Vec::with_capacity(context_start + context_len);
        tokens.extend(query_ids);
        tokens.extend(separator_ids);
        tokens.extend(context_ids);
        let tokens_end = tokens.len();

        if context_len <= top_k {
            debug!(tokens_before, context_len, top_k, "Context fits, passing through");
            return Ok(self.finish(
                context.to_string(),
                tokens_before,
                context_len,
                ReductionStrategy::Passthrough,
            ));
        }

        let relevance = self.relevance(query, &tokens, tokenizer.as_ref()).await;
        let (positions, strategy) = match relevance {
            Relevance::Scored(scores) => (
                top_k_positions(&scores, context_start..tokens_end, top_k),
                ReductionStrategy::Relevance,
            ),
            Relevance::Unavailable(reason) => {
                debug!(reason = reason.as_str(), "Relevance unavailable, keeping head and tail");
                METRICS.record_oracle_fallback(reason.as_str());
                let positions = head_tail_positions(context_len, top_k)
                    .into_iter()
                    .map(|p| context_start + p)
                    .collect();
                (positions, ReductionStrategy::HeadTail)
            }
        };

        let selected: Vec<TokenId> = positions.iter().map(|&p| tokens[p]).collect();
        let condensed = tokenizer.decode(&selected)?;

        Ok(self.finish(condensed, tokens_before, selected.len(), strategy))
    }

    fn finish(
        &self,
        condensed: String,
        tokens_before: usize,
        tokens_after: usize,
        strategy: ReductionStrategy,
    ) -> ReductionResult {
        let result = ReductionResult {
            condensed,
            tokens_before,
            tokens_after,
            strategy,
        };
        METRICS.record_reduction(strategy.as_str(), tokens_before, tokens_after);
        result
    }

    /// Ask the oracle for scores, degrading every failure to "unavailable"
    async fn relevance(
        &self,
        query: &str,
        tokens: &[TokenId],
        tokenizer: &dyn Tokenizer,
    ) -> Relevance {
        let call = self.oracle.score(query, tokens, tokenizer);
        match tokio::time::timeout(self.oracle_timeout, call).await {
            Err(_) => {
                warn!(
                    oracle = self.oracle.name(),
                    timeout_ms = self.oracle_timeout.as_millis() as u64,
                    "Relevance oracle timed out"
                );
                Relevance::Unavailable(UnavailableReason::Timeout)
            }
            Ok(Err(e)) => {
                warn!(oracle = self.oracle.name(), "Relevance oracle failed: {}", e);
                Relevance::Unavailable(UnavailableReason::Failed)
            }
            Ok(Ok(Relevance::Scored(scores))) if scores.len() != tokens.len() => {
                warn!(
                    oracle = self.oracle.name(),
                    scores = scores.len(),
                    tokens = tokens.len(),
                    "Relevance scores not aligned with tokens"
                );
                Relevance::Unavailable(UnavailableReason::Misaligned)
            }
            Ok(Ok(relevance)) => relevance,
        }
    }
}
