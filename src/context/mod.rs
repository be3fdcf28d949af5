//! Context reduction with relevance-ranked token selection
//!
//! This module condenses conversation history to a bounded number of tokens
//! before it is forwarded upstream. Scores come from a pluggable relevance
//! oracle; without one, the head and tail of the history are kept.

pub mod circuit_breaker;
pub mod models;
pub mod oracle;
pub mod reducer;
pub mod selection;
pub mod tokenizer;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use models::{ReductionResult, ReductionStrategy, CONTEXT_SEPARATOR};
pub use oracle::{
    HttpOracleConfig, HttpRelevanceOracle, LexicalOracle, OracleError, Relevance,
    RelevanceOracle, UnavailableOracle, UnavailableReason,
};
pub use reducer::{ContextReducer, OracleKind, ReduceError, ReducerConfig, TokenizerKind};
pub use tokenizer::{TiktokenTokenizer, TokenId, TokenizeError, Tokenizer, WordTokenizer};
