// Error types for decoding sessions.
//
// Only genuinely fatal conditions are errors here. Malformed tokens are not:
// the detokenizer drops and counts them (see `cadenza_tokens::detokenize`).
// End-of-sequence and cancellation are normal session endings, reported as a
// `FinishReason`, not as errors.

use cadenza_tokens::{TokenId, VocabError};
use thiserror::Error;

/// Failure reported by an external scoring model. Opaque to the decoder,
/// which never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("scoring model failed: {0}")]
pub struct ScoringError(pub String);

impl ScoringError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),
    #[error("scoring model returned {actual} logits, expected {expected}")]
    LogitsLength { expected: usize, actual: usize },
    #[error("no token has nonzero probability at field {field}")]
    NoViableToken { field: usize },
    #[error("token {id} sampled for the event slot is not an event type")]
    NotAnEvent { id: TokenId },
    #[error("no generation session has been started")]
    NoSession,
    #[error("generation worker panicked")]
    WorkerPanicked,
}
