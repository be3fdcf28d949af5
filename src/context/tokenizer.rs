//! Tokenization using tiktoken

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Identifier of a single token
pub type TokenId = usize;

/// Tokenizer errors
#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("Tokenizer initialization failed: {0}")]
    Initialization(String),

    #[error("Unknown token id {0}")]
    UnknownToken(TokenId),
}

/// Tokenizer trait for different tokenization strategies
pub trait Tokenizer: Send + Sync {
    /// Split text into token ids, in reading order
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizeError>;

    /// Rebuild text from token ids.
    ///
    /// Any subsequence of an encoding decodes; byte sequences cut inside a
    /// character come back as U+FFFD.
    fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizeError>;

    /// Count the tokens in the given text
    fn count(&self, text: &str) -> Result<usize, TokenizeError> {
        Ok(self.encode(text)?.len())
    }

    /// Tokenizer for a single reduction.
    ///
    /// Ids produced by the session are only meaningful to that session, and
    /// any state it builds is dropped with it.
    fn session(&self) -> Box<dyn Tokenizer>;
}

/// Tiktoken-based tokenizer using cl100k_base (GPT-4, GPT-3.5-turbo)
#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    /// Create a new tiktoken tokenizer with cl100k_base encoding
    pub fn new() -> Result<Self, TokenizeError> {
        let bpe = cl100k_base().map_err(|e| TokenizeError::Initialization(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizeError> {
        // Special-token markup in user text is encoded as plain text
        Ok(self.bpe.encode_ordinary(text))
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizeError> {
        // A selected subset may split a multi-byte character
        let bytes = self.bpe._decode_native(tokens);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn session(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}

#[derive(Default)]
struct Vocabulary {
    ids: HashMap<String, TokenId>,
    pieces: Vec<String>,
}

/// Word-piece tokenizer (fallback).
///
/// Each token is a word together with the whitespace that follows it, so
/// decoding any subsequence concatenates the original pieces verbatim.
/// Ids are assigned on first sight and stay stable for the tokenizer's
/// lifetime; the reducer works on a fresh [`Tokenizer::session`] per call so
/// the vocabulary never outlives one request.
#[derive(Default)]
pub struct WordTokenizer {
    vocab: RwLock<Vocabulary>,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&self, piece: &str) -> TokenId {
        if let Some(id) = self
            .vocab
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .get(piece)
        {
            return *id;
        }

        let mut vocab = self.vocab.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = vocab.ids.get(piece) {
            return *id;
        }
        let id = vocab.pieces.len();
        vocab.pieces.push(piece.to_string());
        vocab.ids.insert(piece.to_string(), id);
        id
    }
}

fn split_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_word = false;
    let mut trailing_space = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                trailing_space = true;
            }
        } else {
            if trailing_space {
                pieces.push(&text[start..i]);
                start = i;
                trailing_space = false;
            }
            in_word = true;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, TokenizeError> {
        Ok(split_pieces(text)
            .into_iter()
            .map(|piece| self.intern(piece))
            .collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, TokenizeError> {
        let vocab = self.vocab.read().unwrap_or_else(PoisonError::into_inner);
        let mut text = String::new();
        for &id in tokens {
            let piece = vocab.pieces.get(id).ok_or(TokenizeError::UnknownToken(id))?;
            text.push_str(piece);
        }
        Ok(text)
    }

    fn session(&self) -> Box<dyn Tokenizer> {
        Box::new(WordTokenizer::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_round_trip() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = tokenizer.encode(text).unwrap();
        assert!(!tokens.is_empty());
        assert!(tokens.len() < 20);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_tiktoken_treats_special_markup_as_text() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "before <|endoftext|> after";
        let tokens = tokenizer.encode(text).unwrap();
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_tiktoken_partial_character_is_replaced() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let tokens = tokenizer.encode("🦀").unwrap();
        assert!(tokens.len() > 1);

        let partial = tokenizer.decode(&tokens[..1]).unwrap();
        assert!(partial.contains('\u{FFFD}'));
        assert_eq!(tokenizer.decode(&tokens).unwrap(), "🦀");
    }

    #[test]
    fn test_word_pieces_keep_trailing_whitespace() {
        assert_eq!(split_pieces("a b  c\n"), vec!["a ", "b  ", "c\n"]);
        assert_eq!(split_pieces("  lead"), vec!["  lead"]);
        assert!(split_pieces("").is_empty());
    }

    #[test]
    fn test_word_tokenizer_round_trip_and_stable_ids() {
        let tokenizer = WordTokenizer::new();
        let text = "the cat saw the dog";
        let tokens = tokenizer.encode(text).unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], tokens[3]);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
        assert_eq!(tokenizer.decode(&tokens[1..3]).unwrap(), "cat saw ");
    }

    #[test]
    fn test_word_tokenizer_unknown_id() {
        let tokenizer = WordTokenizer::new();
        assert!(matches!(
            tokenizer.decode(&[42]),
            Err(TokenizeError::UnknownToken(42))
        ));
    }

    #[test]
    fn test_word_session_has_own_vocabulary() {
        let tokenizer = WordTokenizer::new();
        {
            let session = tokenizer.session();
            let tokens = session.encode("caller1 secret1").unwrap();
            assert_eq!(session.decode(&tokens).unwrap(), "caller1 secret1");
        }

        // Nothing leaks into the parent or into later sessions
        assert!(matches!(
            tokenizer.decode(&[0]),
            Err(TokenizeError::UnknownToken(0))
        ));
        let later = tokenizer.session();
        assert!(later.decode(&[0]).is_err());
        assert_eq!(later.encode("fresh").unwrap(), vec![0]);
    }

    #[test]
    fn test_count() {
        let tokenizer = WordTokenizer::new();
        assert_eq!(tokenizer.count("Hello world test").unwrap(), 3);
    }
}
