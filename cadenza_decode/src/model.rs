// The scoring capability the decoder drives.
//
// The neural network is external. All the decoder needs is two calls: encode
// the token history into some hidden state, then score the next field of the
// compound token being built, given that hidden state and the fields already
// chosen for it. `score_field` returns one logit per vocabulary ID; the
// decoder applies temperature, softmax, and the field mask itself, so an
// implementation may ignore the mask it is handed (it is advisory, for models
// that can skip work on suppressed IDs).

use cadenza_tokens::{CompoundToken, TokenId};

use crate::error::ScoringError;
use crate::mask::FieldMask;

pub trait ScoringModel {
    /// Per-step state produced from the full history.
    type Hidden;

    fn score(&mut self, history: &[CompoundToken]) -> Result<Self::Hidden, ScoringError>;

    /// Logits for the next field. `partial` holds the IDs already chosen for
    /// the current compound token (empty at the event-type slot). The result
    /// must have exactly `vocab_size` entries.
    fn score_field(
        &mut self,
        hidden: &Self::Hidden,
        partial: &[TokenId],
        mask: &FieldMask,
    ) -> Result<Vec<f32>, ScoringError>;
}

impl<M: ScoringModel + ?Sized> ScoringModel for &mut M {
    type Hidden = M::Hidden;

    fn score(&mut self, history: &[CompoundToken]) -> Result<Self::Hidden, ScoringError> {
        (**self).score(history)
    }

    fn score_field(
        &mut self,
        hidden: &Self::Hidden,
        partial: &[TokenId],
        mask: &FieldMask,
    ) -> Result<Vec<f32>, ScoringError> {
        (**self).score_field(hidden, partial, mask)
    }
}

impl<M: ScoringModel + ?Sized> ScoringModel for Box<M> {
    type Hidden = M::Hidden;

    fn score(&mut self, history: &[CompoundToken]) -> Result<Self::Hidden, ScoringError> {
        (**self).score(history)
    }

    fn score_field(
        &mut self,
        hidden: &Self::Hidden,
        partial: &[TokenId],
        mask: &FieldMask,
    ) -> Result<Vec<f32>, ScoringError> {
        (**self).score_field(hidden, partial, mask)
    }
}
