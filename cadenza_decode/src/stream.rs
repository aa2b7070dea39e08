// Lazy streaming over one generation session.
//
// `TokenStream` is an iterator of `StreamChunk`s. Each `next` call steps the
// decoder until at least `yield_every` tokens are pending (or the session
// ends), then hands them out detokenized, so a playback queue can start
// consuming while generation continues. Chunks arrive in history order and
// together cover the whole history exactly once, seed first. The stream is
// finite: it ends after the final partial chunk, or right after yielding an
// error.

use cadenza_tokens::Vocabulary;

use crate::error::GenerateError;
use crate::model::ScoringModel;
use crate::session::{Decoder, FinishReason, StreamChunk};

pub struct TokenStream<'a, M: ScoringModel> {
    decoder: &'a mut Decoder,
    model: M,
    finished: Option<FinishReason>,
    failed: bool,
}

impl<'a, M: ScoringModel> TokenStream<'a, M> {
    /// Wrap a decoder whose session has already been started.
    pub(crate) fn new(decoder: &'a mut Decoder, model: M) -> Self {
        Self {
            decoder,
            model,
            finished: None,
            failed: false,
        }
    }

    /// Set once the underlying session has ended.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finished
    }

    pub fn vocab(&self) -> &Vocabulary {
        self.decoder.vocab()
    }

    /// Cancel the session at the next step boundary. Tokens already appended
    /// are still yielded.
    pub fn cancel(&self) {
        self.decoder.cancel_token().cancel();
    }

    pub fn decoder(&self) -> &Decoder {
        self.decoder
    }
}

impl<M: ScoringModel> Iterator for TokenStream<'_, M> {
    type Item = Result<StreamChunk, GenerateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let batch = self.decoder.config().yield_every;
        while self.finished.is_none() && self.decoder.pending_len() < batch {
            match self.decoder.advance(&mut self.model) {
                Ok(None) => {}
                Ok(Some(reason)) => self.finished = Some(reason),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        if !self.decoder.has_pending() {
            return None;
        }
        Some(Ok(self.decoder.take_pending()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GenerationConfig;
    use crate::grammar_model::GrammarModel;
    use crate::preset::InstrumentPreset;

    fn decoder(yield_every: usize, max_len: usize) -> Decoder {
        let config = GenerationConfig {
            instrument_preset: InstrumentPreset::Piano,
            max_sequence_length: max_len,
            yield_every,
            seed: 11,
            ..GenerationConfig::default()
        };
        Decoder::new(Arc::new(Vocabulary::midi()), config).unwrap()
    }

    #[test]
    fn chunks_cover_history_in_order() {
        let mut d = decoder(3, 20);
        let model = GrammarModel::new(Arc::clone(d.vocab())).with_eos_after(usize::MAX);
        let mut stream = d.stream(model).unwrap();
        let mut seen = Vec::new();
        let mut lens = Vec::new();
        for chunk in stream.by_ref() {
            let chunk = chunk.unwrap();
            seen.extend(chunk.tokens);
            lens.push(chunk.history_len);
        }
        assert_eq!(stream.finish_reason(), Some(FinishReason::MaxLength));
        // Seed of 2, then batches of 3, then the remainder.
        assert_eq!(lens, vec![3, 6, 9, 12, 15, 18, 20]);
        assert_eq!(seen.as_slice(), d.history());
    }

    #[test]
    fn per_step_yield_streams_seed_first() {
        let mut d = decoder(1, 6);
        let model = GrammarModel::new(Arc::clone(d.vocab())).with_eos_after(usize::MAX);
        let first = d.stream(model).unwrap().next().unwrap().unwrap();
        // The two-token seed is already pending when the stream starts.
        assert_eq!(first.tokens.len(), 2);
        assert_eq!(first.tracks[&0][0].name, "patch_change");
    }

    #[test]
    fn cancel_stops_at_next_boundary() {
        let mut d = decoder(1, 100);
        let model = GrammarModel::new(Arc::clone(d.vocab())).with_eos_after(usize::MAX);
        let mut stream = d.stream(model).unwrap();
        stream.next().unwrap().unwrap();
        stream.next().unwrap().unwrap();
        stream.cancel();
        assert!(stream.next().is_none());
        assert_eq!(stream.finish_reason(), Some(FinishReason::Cancelled));
        assert_eq!(stream.decoder().generated(), 1);
    }
}
