// cadenza_decode: constrained autoregressive decoding for Cadenza.
//
// Drives an external scoring model one compound token at a time: the event
// slot first, then each of that event's fields, every draw masked and then
// nucleus-sampled from a session-scoped random source. Finished tokens are
// appended to the history and, when streaming, detokenized straight away so
// playback can begin before the session ends.
//
// Architecture:
// - config.rs:        `GenerationConfig` (serde, JSON-loadable, validated)
// - preset.rs:        Instrument presets: patch-change prefix + channel bans
// - mask.rs:          `FieldMask` / `MaskSet` per-field suppression
// - sampler.rs:       Temperature softmax and top-k/top-p sampling
// - model.rs:         `ScoringModel`, the seam to the neural network
// - grammar_model.rs: `GrammarModel`, a grammar-only reference scorer
// - session.rs:       `Decoder`, the session state machine and step loop
// - stream.rs:        `TokenStream`, lazy chunked iteration over a session
// - worker.rs:        `spawn_generation`, a session on a background thread
// - cancel.rs:        `CancelToken`, cooperative cancellation
// - error.rs:         `GenerateError`, `ScoringError`
//
// A session is deterministic given its config seed and a deterministic model.

pub mod cancel;
pub mod config;
pub mod error;
pub mod grammar_model;
pub mod mask;
pub mod model;
pub mod preset;
pub mod sampler;
pub mod session;
pub mod stream;
pub mod worker;

pub use cancel::CancelToken;
pub use config::GenerationConfig;
pub use error::{GenerateError, ScoringError};
pub use grammar_model::GrammarModel;
pub use mask::{FieldMask, MaskSet};
pub use model::ScoringModel;
pub use preset::{InstrumentPreset, PatchAssignment};
pub use sampler::{NucleusSampler, softmax_with_temperature};
pub use session::{
    Decoder, FinishReason, GenerationOutcome, SessionState, StepOutcome, StreamChunk,
};
pub use stream::TokenStream;
pub use worker::{GenerationHandle, GenerationUpdate, WorkerResult, spawn_generation};
