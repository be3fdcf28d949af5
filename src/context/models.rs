//! Data models for context reduction

use serde::{Deserialize, Serialize};

/// Delimiter placed between the query and the context before tokenization
pub const CONTEXT_SEPARATOR: &str = "\n\n### CONTEXT ###\n\n";

/// How the condensed context was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionStrategy {
    /// Context already fit within `top_k`
    Passthrough,
    /// Highest-scoring tokens from the relevance oracle
    Relevance,
    /// First and last tokens of the context, used without relevance scores
    HeadTail,
}

impl ReductionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionStrategy::Passthrough => "passthrough",
            ReductionStrategy::Relevance => "relevance",
            ReductionStrategy::HeadTail => "head_tail",
        }
    }
}

/// Outcome of one reduction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionResult {
    pub condensed: String,
    /// Tokens in query + separator + context
    pub tokens_before: usize,
    /// Tokens kept in `condensed`
    pub tokens_after: usize,
    pub strategy: ReductionStrategy,
}

impl ReductionResult {
    pub fn tokens_saved(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }

    /// Fraction of the original token count that survived
    pub fn compression_ratio(&self) -> f64 {
        if self.tokens_before == 0 {
            return 1.0;
        }
        self.tokens_after as f64 / self.tokens_before as f64
    }
}
