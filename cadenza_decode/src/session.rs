// Generation session: the constrained field-by-field decoding loop.
//
// A `Decoder` owns everything one session mutates: the token history, the
// streaming detokenizer (and with it the coarse clock `t1`), the session's
// random source, its masks, and the cancellation flag. States:
//
//   Idle ──start_session──▶ Generating ──▶ Completed | Cancelled | Failed
//
// `start_session` may be called again from any state to begin a fresh
// session on the same decoder; it resets history to the preset seed.
//
// One step asks the model to score the history once, then samples the event
// slot under the event mask. `eos` ends the session without appending
// anything. Otherwise each declared field of the chosen event is sampled in
// order, conditioned on the fields chosen so far, under the channel mask (for
// `channel` fields) or the identity mask. The finished compound token is
// zero-padded and appended.
//
// Cancellation and the length cap are checked before each step, never inside
// one, so a session cancelled after N appended tokens has exactly N.
//
// Streaming: `take_pending` hands out everything appended since the previous
// call (the seed included, the first time), run through the detokenizer so
// the caller gets playable events. Notes a later token could still cut short
// are held by the detokenizer and come out in a later chunk; once the session
// is over, `take_pending` releases them all. See `stream.rs` and `worker.rs`.

use std::sync::Arc;

use cadenza_prng::SessionRng;
use cadenza_tokens::{
    CompoundToken, DetokenizeStats, Detokenizer, TokenId, TrackEvents, Vocabulary,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::GenerationConfig;
use crate::error::GenerateError;
use crate::mask::{FieldMask, MaskSet};
use crate::model::ScoringModel;
use crate::sampler::{NucleusSampler, softmax_with_temperature};
use crate::stream::TokenStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Generating,
    Completed,
    Cancelled,
    Failed,
}

/// Why a session stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// The model sampled `eos` at the event slot.
    Eos,
    /// History reached `max_sequence_length`.
    MaxLength,
    Cancelled,
}

/// Result of a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Appended,
    Eos,
}

/// Everything appended since the previous chunk, plus the events that became
/// final with it. The last chunk of a session may carry events but no tokens.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamChunk {
    pub tokens: Vec<CompoundToken>,
    pub tracks: TrackEvents,
    /// History length once this chunk is included.
    pub history_len: usize,
}

/// Summary of a completed non-streaming session.
#[derive(Clone, Debug)]
pub struct GenerationOutcome {
    pub reason: FinishReason,
    /// Compound tokens appended beyond the seed.
    pub generated: usize,
    pub history: Vec<CompoundToken>,
    /// The whole history detokenized.
    pub tracks: TrackEvents,
    pub stats: DetokenizeStats,
}

pub struct Decoder {
    vocab: Arc<Vocabulary>,
    config: GenerationConfig,
    sampler: NucleusSampler,
    history: Vec<CompoundToken>,
    seed_len: usize,
    detok: Detokenizer,
    rng: SessionRng,
    masks: Option<MaskSet>,
    cancel: CancelToken,
    state: SessionState,
    /// History index up to which tokens have been streamed out.
    emitted: usize,
    sessions_started: u64,
}

impl Decoder {
    pub fn new(vocab: Arc<Vocabulary>, config: GenerationConfig) -> Result<Self, GenerateError> {
        config.validate()?;
        Ok(Self {
            sampler: NucleusSampler::new(config.top_p, config.top_k),
            rng: SessionRng::new(config.seed),
            vocab,
            config,
            history: Vec::new(),
            seed_len: 0,
            detok: Detokenizer::new(),
            masks: None,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
            emitted: 0,
            sessions_started: 0,
        })
    }

    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[CompoundToken] {
        &self.history
    }

    /// Compound tokens appended this session, not counting the seed.
    pub fn generated(&self) -> usize {
        self.history.len() - self.seed_len
    }

    /// Detokenizer counters for everything streamed out so far.
    pub fn stats(&self) -> &DetokenizeStats {
        self.detok.stats()
    }

    /// A handle that cancels this decoder's current session from anywhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Begin a new session: seed the history from the instrument preset,
    /// rebuild masks, derive a fresh random stream, and clear the
    /// cancellation flag and the detokenizer clock.
    pub fn start_session(&mut self) -> Result<(), GenerateError> {
        if self.state == SessionState::Generating {
            debug!(history = self.history.len(), "abandoning active session");
        }
        let preset = self.config.instrument_preset;
        let prefix = preset.prefix(&self.vocab)?;
        let masks = MaskSet::build(
            &self.vocab,
            preset.fixes_patches(),
            self.config.disable_control_change,
            preset.disabled_channels(),
            self.config.strict_fields,
        )?;

        self.seed_len = prefix.len();
        self.history = prefix;
        self.masks = Some(masks);
        self.detok.reset();
        self.rng = SessionRng::for_session(self.config.seed, self.sessions_started);
        self.sessions_started += 1;
        self.cancel.reset();
        self.emitted = 0;
        self.state = SessionState::Generating;
        info!(
            preset = %preset,
            seed_len = self.seed_len,
            max_len = self.config.max_sequence_length,
            session = self.sessions_started,
            "generation session started"
        );
        Ok(())
    }

    /// Run one step unless the session should stop first. Returns the finish
    /// reason once the session is over; `Ok(None)` means a token was appended.
    pub fn advance<M: ScoringModel>(
        &mut self,
        model: &mut M,
    ) -> Result<Option<FinishReason>, GenerateError> {
        if self.state != SessionState::Generating {
            return Err(GenerateError::NoSession);
        }
        if self.cancel.is_cancelled() {
            return Ok(Some(self.finish(FinishReason::Cancelled)));
        }
        if self.history.len() >= self.config.max_sequence_length {
            return Ok(Some(self.finish(FinishReason::MaxLength)));
        }
        match self.step(model) {
            Ok(StepOutcome::Appended) => Ok(None),
            Ok(StepOutcome::Eos) => Ok(Some(self.finish(FinishReason::Eos))),
            Err(e) => {
                self.state = SessionState::Failed;
                warn!(error = %e, history = self.history.len(), "generation session failed");
                Err(e)
            }
        }
    }

    /// Step until the session finishes, calling `on_progress` with the
    /// history length after every appended token.
    pub fn run<M, F>(&mut self, model: &mut M, mut on_progress: F) -> Result<FinishReason, GenerateError>
    where
        M: ScoringModel,
        F: FnMut(usize),
    {
        loop {
            match self.advance(model)? {
                Some(reason) => return Ok(reason),
                None => on_progress(self.history.len()),
            }
        }
    }

    /// Start a session, run it to the end, and detokenize the result.
    pub fn generate<M, F>(&mut self, model: &mut M, on_progress: F) -> Result<GenerationOutcome, GenerateError>
    where
        M: ScoringModel,
        F: FnMut(usize),
    {
        self.start_session()?;
        let reason = self.run(model, on_progress)?;
        let chunk = self.take_pending();
        Ok(GenerationOutcome {
            reason,
            generated: self.generated(),
            history: self.history.clone(),
            tracks: chunk.tracks,
            stats: *self.detok.stats(),
        })
    }

    /// Start a session and return it as a lazy stream of chunks.
    pub fn stream<M: ScoringModel>(&mut self, model: M) -> Result<TokenStream<'_, M>, GenerateError> {
        self.start_session()?;
        Ok(TokenStream::new(self, model))
    }

    /// Tokens appended but not yet handed out by `take_pending`.
    pub fn pending_len(&self) -> usize {
        self.history.len() - self.emitted
    }

    /// Whether `take_pending` has anything to hand out: unstreamed tokens, or
    /// held events once the session is over.
    pub fn has_pending(&self) -> bool {
        self.pending_len() > 0 || (self.state != SessionState::Generating && self.detok.held_len() > 0)
    }

    /// Hand out everything appended since the last call, detokenized with the
    /// session's running clock.
    pub fn take_pending(&mut self) -> StreamChunk {
        let tokens = self.history[self.emitted..].to_vec();
        self.emitted = self.history.len();
        let mut tracks = self.detok.feed(&self.vocab, &tokens);
        if self.state != SessionState::Generating {
            for (track, events) in self.detok.flush() {
                tracks.entry(track).or_default().extend(events);
            }
        }
        StreamChunk {
            tokens,
            tracks,
            history_len: self.history.len(),
        }
    }

    /// Decode and append one compound token.
    fn step<M: ScoringModel>(&mut self, model: &mut M) -> Result<StepOutcome, GenerateError> {
        let Self {
            vocab,
            config,
            sampler,
            history,
            rng,
            masks,
            ..
        } = self;
        let masks = masks.as_ref().ok_or(GenerateError::NoSession)?;
        let vocab: &Vocabulary = vocab;
        let mut draw = FieldDraw {
            sampler,
            temperature: config.temperature,
            vocab_size: vocab.vocab_size() as usize,
            rng,
        };

        let hidden = model.score(history)?;
        let capacity = vocab.max_token_seq();
        let mut ids: Vec<TokenId> = Vec::with_capacity(capacity);

        let head = draw.sample(model, &hidden, &ids, masks.event_mask(), 0)?;
        if head == vocab.eos_id() {
            return Ok(StepOutcome::Eos);
        }
        let entry = vocab
            .event_by_id(head)
            .ok_or(GenerateError::NotAnEvent { id: head })?;
        ids.push(head);

        for field in 0..entry.field_count() {
            if ids.len() >= capacity {
                break;
            }
            let mask = masks.field_mask(entry, field);
            let id = draw.sample(model, &hidden, &ids, mask, field + 1)?;
            ids.push(id);
        }

        history.push(CompoundToken::padded(&ids, capacity));
        Ok(StepOutcome::Appended)
    }

    fn finish(&mut self, reason: FinishReason) -> FinishReason {
        self.state = match reason {
            FinishReason::Cancelled => SessionState::Cancelled,
            FinishReason::Eos | FinishReason::MaxLength => SessionState::Completed,
        };
        info!(
            ?reason,
            generated = self.generated(),
            history = self.history.len(),
            "generation session finished"
        );
        reason
    }
}

/// Per-step sampling context, borrowed out of the decoder.
struct FieldDraw<'a> {
    sampler: &'a NucleusSampler,
    temperature: f32,
    vocab_size: usize,
    rng: &'a mut SessionRng,
}

impl FieldDraw<'_> {
    fn sample<M: ScoringModel>(
        &mut self,
        model: &mut M,
        hidden: &M::Hidden,
        partial: &[TokenId],
        mask: &FieldMask,
        field: usize,
    ) -> Result<TokenId, GenerateError> {
        let logits = model.score_field(hidden, partial, mask)?;
        if logits.len() != self.vocab_size {
            return Err(GenerateError::LogitsLength {
                expected: self.vocab_size,
                actual: logits.len(),
            });
        }
        let mut probs = softmax_with_temperature(&logits, self.temperature);
        mask.apply(&mut probs);
        let idx = self
            .sampler
            .sample(&probs, self.rng)
            .ok_or(GenerateError::NoViableToken { field })?;
        Ok(idx as TokenId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use crate::preset::InstrumentPreset;
    use cadenza_tokens::grammar::{NOTE, PATCH_CHANGE};

    /// Scripted model: at the event slot it plays `events` in order (then
    /// `eos`), and every field gets the first ID of its parameter class.
    struct Scripted {
        vocab: Arc<Vocabulary>,
        events: Vec<TokenId>,
        scored: usize,
    }

    impl Scripted {
        fn new(vocab: &Arc<Vocabulary>, events: &[&str]) -> Self {
            Self {
                vocab: Arc::clone(vocab),
                events: events.iter().map(|n| vocab.event(n).unwrap().id).collect(),
                scored: 0,
            }
        }
    }

    impl ScoringModel for Scripted {
        type Hidden = usize;

        fn score(&mut self, _history: &[CompoundToken]) -> Result<usize, ScoringError> {
            self.scored += 1;
            Ok(self.scored - 1)
        }

        fn score_field(
            &mut self,
            hidden: &usize,
            partial: &[TokenId],
            _mask: &FieldMask,
        ) -> Result<Vec<f32>, ScoringError> {
            let mut logits = vec![f32::NEG_INFINITY; self.vocab.vocab_size() as usize];
            let target = match partial.first() {
                None => *self.events.get(*hidden).unwrap_or(&self.vocab.eos_id()),
                Some(&head) => {
                    let entry = self.vocab.event_by_id(head).unwrap();
                    let class = entry.classes()[partial.len() - 1];
                    self.vocab.param_at(class).unwrap().base
                }
            };
            logits[target as usize] = 0.0;
            Ok(logits)
        }
    }

    fn decoder(preset: InstrumentPreset, max_len: usize) -> (Arc<Vocabulary>, Decoder) {
        let vocab = Arc::new(Vocabulary::midi());
        let config = GenerationConfig {
            instrument_preset: preset,
            max_sequence_length: max_len,
            ..GenerationConfig::default()
        };
        let d = Decoder::new(Arc::clone(&vocab), config).unwrap();
        (vocab, d)
    }

    #[test]
    fn advance_before_start_is_an_error() {
        let (vocab, mut d) = decoder(InstrumentPreset::None, 8);
        let mut m = Scripted::new(&vocab, &[]);
        assert_eq!(d.state(), SessionState::Idle);
        assert!(matches!(d.advance(&mut m), Err(GenerateError::NoSession)));
    }

    #[test]
    fn eos_ends_without_appending() {
        let (vocab, mut d) = decoder(InstrumentPreset::None, 16);
        let mut m = Scripted::new(&vocab, &[NOTE, NOTE]);
        let out = d.generate(&mut m, |_| {}).unwrap();
        assert_eq!(out.reason, FinishReason::Eos);
        assert_eq!(out.generated, 2);
        assert_eq!(out.history.len(), 3);
        assert_eq!(d.state(), SessionState::Completed);
    }

    #[test]
    fn appended_tokens_are_padded_and_well_formed() {
        let (vocab, mut d) = decoder(InstrumentPreset::None, 16);
        let mut m = Scripted::new(&vocab, &[NOTE]);
        let out = d.generate(&mut m, |_| {}).unwrap();
        let token = &out.history[1];
        assert_eq!(token.as_slice(), &[3, 7, 135, 2199, 151, 2327, 2343, 2471]);
        assert_eq!(out.stats.dropped(), 0);
        assert_eq!(out.tracks.values().map(Vec::len).sum::<usize>(), 0, "zero-length note is removed");
    }

    #[test]
    fn shorter_events_are_zero_padded() {
        let vocab = Arc::new(Vocabulary::midi());
        let config = GenerationConfig {
            instrument_preset: InstrumentPreset::None,
            disable_control_change: false,
            ..GenerationConfig::default()
        };
        let mut d = Decoder::new(Arc::clone(&vocab), config).unwrap();
        let mut m = Scripted::new(&vocab, &[PATCH_CHANGE]);
        let out = d.generate(&mut m, |_| {}).unwrap();
        assert_eq!(out.history[1].as_slice(), &[4, 7, 135, 2199, 2327, 2599, 0, 0]);
        assert_eq!(out.tracks[&0][0].parameters, vec![0, 0, 0]);
    }

    #[test]
    fn max_length_counts_the_seed() {
        let (vocab, mut d) = decoder(InstrumentPreset::Piano, 5);
        let mut m = Scripted::new(&vocab, &[NOTE; 10]);
        let mut progress = Vec::new();
        let out = d.generate(&mut m, |len| progress.push(len)).unwrap();
        assert_eq!(out.reason, FinishReason::MaxLength);
        assert_eq!(out.history.len(), 5);
        assert_eq!(out.generated, 3);
        assert_eq!(progress, vec![3, 4, 5]);
    }

    #[test]
    fn seed_already_at_cap_finishes_immediately() {
        let (vocab, mut d) = decoder(InstrumentPreset::PopRock, 4);
        let mut m = Scripted::new(&vocab, &[NOTE]);
        let out = d.generate(&mut m, |_| {}).unwrap();
        assert_eq!(out.reason, FinishReason::MaxLength);
        assert_eq!(out.generated, 0);
        assert_eq!(m.scored, 0);
    }

    #[test]
    fn banned_event_leaves_nothing_to_sample() {
        // The preset fixes patches, so a model that only wants patch_change
        // has no probability mass left at the event slot.
        let (vocab, mut d) = decoder(InstrumentPreset::Piano, 16);
        let mut m = Scripted::new(&vocab, &[PATCH_CHANGE]);
        let err = d.generate(&mut m, |_| {}).unwrap_err();
        assert!(matches!(err, GenerateError::NoViableToken { field: 0 }));
        assert_eq!(d.state(), SessionState::Failed);
    }

    #[test]
    fn restart_resets_history_and_clock() {
        let (vocab, mut d) = decoder(InstrumentPreset::None, 16);
        let mut m = Scripted::new(&vocab, &[NOTE, NOTE, NOTE]);
        d.generate(&mut m, |_| {}).unwrap();
        d.start_session().unwrap();
        assert_eq!(d.history().len(), 1);
        assert_eq!(d.generated(), 0);
        assert_eq!(d.pending_len(), 1);
        assert_eq!(d.stats().accepted, 0);
    }

    #[test]
    fn take_pending_hands_out_each_token_once() {
        let (vocab, mut d) = decoder(InstrumentPreset::None, 16);
        let mut m = Scripted::new(&vocab, &[NOTE, NOTE]);
        d.start_session().unwrap();
        assert_eq!(d.take_pending().tokens.len(), 1);
        d.advance(&mut m).unwrap();
        d.advance(&mut m).unwrap();
        let chunk = d.take_pending();
        assert_eq!(chunk.tokens.len(), 2);
        assert_eq!(chunk.history_len, 3);
        assert!(d.take_pending().tokens.is_empty());
    }
}
