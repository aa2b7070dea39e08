// Compound tokens: one generation step's worth of sub-token IDs.
//
// Slot 0 holds an event-type ID (or a reserved ID such as `bos`); slots
// 1..=N hold that event's field IDs in declared order. Tokens produced by the
// decoder are always zero-padded to the vocabulary's `max_token_seq`, but the
// detokenizer accepts any length, since histories can come from anywhere.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::vocab::TokenId;

/// Inline capacity covering the MIDI grammar (7 fields + the type slot).
const INLINE_SLOTS: usize = 8;

/// A fixed-capacity sequence of sub-token IDs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompoundToken(SmallVec<[TokenId; INLINE_SLOTS]>);

impl CompoundToken {
    /// Wrap `ids` as-is, without padding.
    pub fn from_slice(ids: &[TokenId]) -> Self {
        Self(SmallVec::from_slice(ids))
    }

    /// Copy `ids` and zero-pad to `capacity` slots. Longer inputs are kept
    /// whole rather than truncated.
    pub fn padded(ids: &[TokenId], capacity: usize) -> Self {
        let mut slots = SmallVec::from_slice(ids);
        if slots.len() < capacity {
            slots.resize(capacity, 0);
        }
        Self(slots)
    }

    /// Slot 0, if the token has any slots at all.
    pub fn head(&self) -> Option<TokenId> {
        self.0.first().copied()
    }

    pub fn as_slice(&self) -> &[TokenId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[TokenId]> for CompoundToken {
    fn as_ref(&self) -> &[TokenId] {
        &self.0
    }
}

impl From<Vec<TokenId>> for CompoundToken {
    fn from(ids: Vec<TokenId>) -> Self {
        Self(SmallVec::from_vec(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_fills_with_zero_and_never_truncates() {
        let t = CompoundToken::padded(&[4, 7, 135], 8);
        assert_eq!(t.as_slice(), &[4, 7, 135, 0, 0, 0, 0, 0]);
        let long = CompoundToken::padded(&[1; 10], 8);
        assert_eq!(long.len(), 10);
    }

    #[test]
    fn serializes_as_a_plain_array() {
        let t = CompoundToken::from_slice(&[1, 0, 0]);
        assert_eq!(serde_json::to_string(&t).unwrap(), "[1,0,0]");
    }
}
