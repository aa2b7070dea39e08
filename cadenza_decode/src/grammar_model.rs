// A scoring model that knows only the token grammar.
//
// `GrammarModel` stands in for the neural network in the CLI and the tests.
// It never proposes an ill-formed token: at the event slot it scores the
// event types (favouring `note`) and, once the history is long enough, `eos`;
// for every later field it puts all its mass on the legal range of that
// field's parameter class. A few fields get a gentle shape so the output is
// listenable rather than uniform noise:
//
// - `time1`: small steps are likelier, so the music moves forward slowly.
// - `duration`: centred on an eighth note.
// - `pitch`: centred on middle C.
//
// Logits outside the legal set are `-inf`.

use std::sync::Arc;

use cadenza_tokens::grammar::{DURATION, NOTE, PITCH, TIME1};
use cadenza_tokens::{CompoundToken, TokenId, Vocabulary};

use crate::error::ScoringError;
use crate::mask::FieldMask;
use crate::model::ScoringModel;

const ILLEGAL: f32 = f32::NEG_INFINITY;

/// Duration index of an eighth note (240 ticks).
const EIGHTH_NOTE: f32 = 8.0;
const MIDDLE_C: f32 = 60.0;

#[derive(Clone, Debug)]
pub struct GrammarModel {
    vocab: Arc<Vocabulary>,
    eos_after: usize,
    note_bias: f32,
}

impl GrammarModel {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self {
            vocab,
            eos_after: 128,
            note_bias: 3.0,
        }
    }

    /// Make `eos` available once the history holds at least `len` tokens.
    pub fn with_eos_after(mut self, len: usize) -> Self {
        self.eos_after = len;
        self
    }

    /// Extra logit for `note` over the other event types.
    pub fn with_note_bias(mut self, bias: f32) -> Self {
        self.note_bias = bias;
        self
    }

    fn event_logits(&self, history_len: usize, logits: &mut [f32]) {
        for entry in self.vocab.events() {
            logits[entry.id as usize] = if entry.name == NOTE { self.note_bias } else { 0.0 };
        }
        if history_len >= self.eos_after {
            logits[self.vocab.eos_id() as usize] = 0.0;
        }
    }

    fn field_logits(&self, partial: &[TokenId], logits: &mut [f32]) -> Result<(), ScoringError> {
        let head = partial[0];
        let entry = self
            .vocab
            .event_by_id(head)
            .ok_or_else(|| ScoringError::new(format!("partial token starts with non-event {head}")))?;
        let field = partial.len() - 1;
        let (Some(name), Some(&class)) = (entry.fields.get(field), entry.classes().get(field)) else {
            return Err(ScoringError::new(format!(
                "{} has only {} fields, asked for field {}",
                entry.name,
                entry.field_count(),
                field + 1
            )));
        };
        let range = self
            .vocab
            .param_at(class)
            .ok_or_else(|| ScoringError::new(format!("no parameter class for {name}")))?;
        let shape: fn(f32) -> f32 = match name.as_str() {
            TIME1 => |v| -v,
            DURATION => |v| -(v - EIGHTH_NOTE).abs() / 4.0,
            PITCH => |v| -(v - MIDDLE_C).abs() / 6.0,
            _ => |_| 0.0,
        };
        for (value, id) in range.ids().enumerate() {
            logits[id as usize] = shape(value as f32);
        }
        Ok(())
    }
}

impl ScoringModel for GrammarModel {
    /// History length at scoring time.
    type Hidden = usize;

    fn score(&mut self, history: &[CompoundToken]) -> Result<usize, ScoringError> {
        Ok(history.len())
    }

    fn score_field(
        &mut self,
        hidden: &usize,
        partial: &[TokenId],
        _mask: &FieldMask,
    ) -> Result<Vec<f32>, ScoringError> {
        let mut logits = vec![ILLEGAL; self.vocab.vocab_size() as usize];
        if partial.is_empty() {
            self.event_logits(*hidden, &mut logits);
        } else {
            self.field_logits(partial, &mut logits)?;
        }
        Ok(logits)
    }
}
