// Per-field suppression masks.
//
// A `FieldMask` is a 0/1 weight per vocabulary ID, multiplied into the
// probability vector before sampling. A session builds its `MaskSet` once at
// start:
//
// - **event mask** (field 0): only `eos` and the event-type IDs, minus
//   `patch_change` / `control_change` when the session disables them.
// - **channel mask**: every ID except the disabled channels' sub-tokens.
// - **identity mask**: everything allowed.
//
// With `strict` on, each field additionally gets its parameter class's legal
// range (and the channel class still loses the disabled channels), so a model
// can no longer produce out-of-range fields that the detokenizer would drop.

use cadenza_tokens::grammar::{CHANNEL, CONTROL_CHANGE, PATCH_CHANGE};
use cadenza_tokens::{EventEntry, TokenId, VocabError, Vocabulary};

/// Multiplicative 0/1 weight per vocabulary ID.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldMask(Vec<f32>);

impl FieldMask {
    pub fn allow_all(len: usize) -> Self {
        Self(vec![1.0; len])
    }

    pub fn deny_all(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Out-of-range IDs are ignored.
    pub fn allow(&mut self, id: TokenId) {
        if let Some(w) = self.0.get_mut(id as usize) {
            *w = 1.0;
        }
    }

    pub fn deny(&mut self, id: TokenId) {
        if let Some(w) = self.0.get_mut(id as usize) {
            *w = 0.0;
        }
    }

    pub fn allows(&self, id: TokenId) -> bool {
        self.0.get(id as usize).is_some_and(|&w| w > 0.0)
    }

    /// Multiply `probs` elementwise by the mask. Entries past the mask's
    /// length are zeroed.
    pub fn apply(&self, probs: &mut [f32]) {
        for (i, p) in probs.iter_mut().enumerate() {
            *p *= self.0.get(i).copied().unwrap_or(0.0);
        }
    }

    pub fn allowed_count(&self) -> usize {
        self.0.iter().filter(|&&w| w > 0.0).count()
    }
}

/// All masks one session samples under.
#[derive(Clone, Debug)]
pub struct MaskSet {
    event: FieldMask,
    channel: FieldMask,
    identity: FieldMask,
    /// Per parameter class, present only in strict mode.
    class_ranges: Option<Vec<FieldMask>>,
}

impl MaskSet {
    pub fn build(
        vocab: &Vocabulary,
        disable_patch_change: bool,
        disable_control_change: bool,
        disabled_channels: &[u32],
        strict: bool,
    ) -> Result<Self, VocabError> {
        let len = vocab.vocab_size() as usize;

        let mut event = FieldMask::deny_all(len);
        event.allow(vocab.eos_id());
        for entry in vocab.events() {
            event.allow(entry.id);
        }
        let mut banned_events = Vec::new();
        if disable_patch_change {
            banned_events.push(PATCH_CHANGE);
        }
        if disable_control_change {
            banned_events.push(CONTROL_CHANGE);
        }
        for name in banned_events {
            if let Some(entry) = vocab.event(name) {
                event.deny(entry.id);
            }
        }

        let mut channel = FieldMask::allow_all(len);
        let mut disabled_ids = Vec::with_capacity(disabled_channels.len());
        for &c in disabled_channels {
            disabled_ids.push(vocab.encode_field(CHANNEL, c)?);
        }
        for &id in &disabled_ids {
            channel.deny(id);
        }

        let class_ranges = strict.then(|| {
            vocab
                .params()
                .iter()
                .map(|range| {
                    let mut m = FieldMask::deny_all(len);
                    for id in range.ids() {
                        m.allow(id);
                    }
                    if range.name == CHANNEL {
                        for &id in &disabled_ids {
                            m.deny(id);
                        }
                    }
                    m
                })
                .collect()
        });

        Ok(Self {
            event,
            channel,
            identity: FieldMask::allow_all(len),
            class_ranges,
        })
    }

    /// Mask for the event-type slot.
    pub fn event_mask(&self) -> &FieldMask {
        &self.event
    }

    /// Mask for field `field` (0-based among the event's declared fields).
    pub fn field_mask(&self, entry: &EventEntry, field: usize) -> &FieldMask {
        if let Some(ranges) = &self.class_ranges
            && let Some(m) = entry.classes().get(field).and_then(|&c| ranges.get(c))
        {
            return m;
        }
        match entry.fields.get(field) {
            Some(name) if name == CHANNEL => &self.channel,
            _ => &self.identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_tokens::grammar::{NOTE, PITCH, SET_TEMPO};

    #[test]
    fn event_mask_allows_only_eos_and_enabled_events() {
        let v = Vocabulary::midi();
        let masks = MaskSet::build(&v, true, true, &[], false).unwrap();
        let m = masks.event_mask();
        assert!(m.allows(v.eos_id()));
        assert!(m.allows(v.event(NOTE).unwrap().id));
        assert!(m.allows(v.event(SET_TEMPO).unwrap().id));
        assert!(!m.allows(v.event(PATCH_CHANGE).unwrap().id));
        assert!(!m.allows(v.event(CONTROL_CHANGE).unwrap().id));
        assert!(!m.allows(v.pad_id()));
        assert!(!m.allows(v.bos_id()));
        assert_eq!(m.allowed_count(), 3);
    }

    #[test]
    fn channel_mask_hits_exact_sub_tokens() {
        let v = Vocabulary::midi();
        let masks = MaskSet::build(&v, false, false, &[9, 15], false).unwrap();
        let note = v.event(NOTE).unwrap();
        let ch = note.field_index(CHANNEL).unwrap();
        let m = masks.field_mask(note, ch);
        assert!(!m.allows(2327 + 9));
        assert!(!m.allows(2327 + 15));
        assert!(m.allows(2327));
        assert_eq!(m.allowed_count(), v.vocab_size() as usize - 2);

        // Non-channel fields are unconstrained.
        let pitch = note.field_index(PITCH).unwrap();
        assert_eq!(masks.field_mask(note, pitch).allowed_count(), v.vocab_size() as usize);
    }

    #[test]
    fn strict_mode_restricts_to_class_range() {
        let v = Vocabulary::midi();
        let masks = MaskSet::build(&v, false, false, &[3], true).unwrap();
        let note = v.event(NOTE).unwrap();
        let pitch = masks.field_mask(note, note.field_index(PITCH).unwrap());
        assert_eq!(pitch.allowed_count(), 128);
        assert!(pitch.allows(v.encode_field(PITCH, 0).unwrap()));
        assert!(!pitch.allows(v.encode_field(CHANNEL, 0).unwrap()));

        let channel = masks.field_mask(note, note.field_index(CHANNEL).unwrap());
        assert_eq!(channel.allowed_count(), 15);
        assert!(!channel.allows(v.encode_field(CHANNEL, 3).unwrap()));
    }

    #[test]
    fn rejects_channels_outside_the_class() {
        let v = Vocabulary::midi();
        assert!(matches!(
            MaskSet::build(&v, false, false, &[16], false),
            Err(VocabError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn apply_zeroes_masked_and_overflow_entries() {
        let mut m = FieldMask::allow_all(3);
        m.deny(1);
        m.deny(99);
        let mut probs = [0.5, 0.25, 0.25, 0.9];
        m.apply(&mut probs);
        assert_eq!(probs, [0.5, 0.0, 0.25, 0.0]);
    }
}
