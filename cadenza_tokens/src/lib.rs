// cadenza_tokens: token vocabulary and codec for Cadenza MIDI generation.
//
// A pretrained sequence model emits one compound token per step: an event-type
// ID followed by that event's field IDs. This crate owns everything about what
// those integers mean, and turns a token history back into absolute-time,
// per-track events for playback. It has no knowledge of the model or of how
// tokens are sampled; that lives in `cadenza_decode`.
//
// Module overview:
// - `grammar.rs`:    Event shapes and parameter classes (`Grammar::midi()`).
// - `vocab.rs`:      `Vocabulary`: the ID-space partition, field encode/decode,
//                    semantic encoding of whole events.
// - `compound.rs`:   `CompoundToken`, the zero-padded per-step token.
// - `timing.rs`:     Tick, duration, and tempo conversions.
// - `detokenize.rs`: Streaming detokenizer with malformed-token dropping and
//                    per-key note overlap resolution.
// - `playback.rs`:   `PlaybackSchedule`, a tempo-aware per-track event queue
//                    for hosts that play the stream back.
//
// Design decisions:
// - **Immutable vocabulary.** Built once from a `Grammar`, passed explicitly.
// - **Lenient decoding.** Malformed tokens are dropped and counted, never
//   raised; see `DetokenizeStats`.

pub mod compound;
pub mod detokenize;
pub mod grammar;
pub mod playback;
pub mod timing;
pub mod vocab;

pub use compound::CompoundToken;
pub use detokenize::{DetokenizeStats, Detokenizer, Event, TrackEvents, detokenize};
pub use grammar::{EventShape, Grammar, ParamClass};
pub use playback::PlaybackSchedule;
pub use vocab::{EventEntry, ParamRange, TokenClass, TokenId, VocabError, Vocabulary};
