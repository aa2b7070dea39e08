// Token vocabulary: the partition of the integer ID space.
//
// `Vocabulary::build` allocates IDs sequentially from a `Grammar`:
//   1. reserved singletons `pad`, `bos`, `eos` (0, 1, 2),
//   2. one ID per event type, in grammar order,
//   3. one contiguous range per parameter class, in grammar order.
// Ranges never overlap and `vocab_size` is the sum of everything allocated.
// For `Grammar::midi()` that yields note=3 .. set_tempo=6, time1 at 7,
// time2 at 135, duration at 151, track at 2199, channel at 2327, and so on up
// to a vocabulary of 3239 IDs.
//
// The vocabulary is an immutable value. Build it once at startup and hand a
// reference (or an `Arc`) to every component that maps IDs to meaning; there
// is no global lookup table.
//
// Field values are encoded as `class.base + value` and decoded as
// `raw - class.base`; a decoded value outside `[0, cardinality)` marks the
// token as malformed.

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

use crate::compound::CompoundToken;
use crate::grammar::{Grammar, ROUTING_FIELDS};

/// A single sub-token ID.
pub type TokenId = u32;

pub const PAD_ID: TokenId = 0;
pub const BOS_ID: TokenId = 1;
pub const EOS_ID: TokenId = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VocabError {
    #[error("event type `{0}` is declared more than once")]
    DuplicateEvent(String),
    #[error("parameter class `{0}` is declared more than once")]
    DuplicateParameter(String),
    #[error("parameter class `{0}` has zero cardinality")]
    EmptyParameter(String),
    #[error("event `{event}` uses undeclared parameter class `{field}`")]
    UnknownParameter { event: String, field: String },
    #[error("event `{event}` must begin with the fields time1, time2, track")]
    MissingRoutingFields { event: String },
    #[error("vocabulary does not fit in the 32-bit token id space")]
    TooLarge,
    #[error("unknown event type `{0}`")]
    UnknownEvent(String),
    #[error("unknown parameter class `{0}`")]
    UnknownClass(String),
    #[error("value {value} is outside the `{class}` range [0, {cardinality})")]
    ValueOutOfRange {
        class: String,
        value: i64,
        cardinality: u32,
    },
    #[error("event `{event}` takes {expected} field values, got {actual}")]
    ArityMismatch {
        event: String,
        expected: usize,
        actual: usize,
    },
}

/// The contiguous ID range of one parameter class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamRange {
    pub name: String,
    pub base: TokenId,
    pub cardinality: u32,
}

impl ParamRange {
    pub fn ids(&self) -> Range<TokenId> {
        self.base..self.base + self.cardinality
    }

    pub fn contains(&self, id: TokenId) -> bool {
        self.ids().contains(&id)
    }

    /// Semantic value of `raw`, or `None` if it falls outside this class.
    pub fn decode(&self, raw: TokenId) -> Option<u32> {
        let value = raw.checked_sub(self.base)?;
        (value < self.cardinality).then_some(value)
    }

    /// Sub-token ID for `value`, or `None` if the value is out of range.
    pub fn encode(&self, value: u32) -> Option<TokenId> {
        (value < self.cardinality).then(|| self.base + value)
    }
}

/// One event type with its ID and resolved field classes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEntry {
    pub name: String,
    pub id: TokenId,
    pub fields: Vec<String>,
    /// Index into `Vocabulary::params` for each field.
    classes: Vec<usize>,
}

impl EventEntry {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Position of `field` among this event's fields.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Position of `field` in a detokenized event's `parameters`, where slot 0
    /// is the absolute tick and the routing fields are omitted.
    pub fn output_index(&self, field: &str) -> Option<usize> {
        let idx = self.field_index(field)?;
        (idx >= ROUTING_FIELDS.len()).then(|| idx - ROUTING_FIELDS.len() + 1)
    }

    /// Parameter-class indices, one per field.
    pub fn classes(&self) -> &[usize] {
        &self.classes
    }
}

/// What a single token ID means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenClass<'a> {
    Pad,
    Bos,
    Eos,
    Event(&'a str),
    Param { class: &'a str, value: u32 },
}

/// Immutable ID-space partition built from a `Grammar`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    events: Vec<EventEntry>,
    params: Vec<ParamRange>,
    event_by_name: BTreeMap<String, usize>,
    param_by_name: BTreeMap<String, usize>,
    first_event_id: TokenId,
    vocab_size: u32,
    max_token_seq: usize,
}

impl Vocabulary {
    /// Allocate the ID space for `grammar`.
    ///
    /// Deterministic: identical grammars always yield identical mappings.
    pub fn build(grammar: &Grammar) -> Result<Self, VocabError> {
        let mut next: TokenId = 0;
        let pad = allocate(&mut next, 1)?;
        let bos = allocate(&mut next, 1)?;
        let eos = allocate(&mut next, 1)?;
        debug_assert_eq!((pad, bos, eos), (PAD_ID, BOS_ID, EOS_ID));

        let mut param_by_name = BTreeMap::new();
        for (i, class) in grammar.params.iter().enumerate() {
            if class.cardinality == 0 {
                return Err(VocabError::EmptyParameter(class.name.clone()));
            }
            if param_by_name.insert(class.name.clone(), i).is_some() {
                return Err(VocabError::DuplicateParameter(class.name.clone()));
            }
        }

        let first_event_id = next;
        let mut events = Vec::with_capacity(grammar.events.len());
        let mut event_by_name = BTreeMap::new();
        for shape in &grammar.events {
            if event_by_name
                .insert(shape.name.clone(), events.len())
                .is_some()
            {
                return Err(VocabError::DuplicateEvent(shape.name.clone()));
            }
            let routed = shape.fields.len() >= ROUTING_FIELDS.len()
                && shape.fields.iter().zip(ROUTING_FIELDS).all(|(f, r)| f == r);
            if !routed {
                return Err(VocabError::MissingRoutingFields {
                    event: shape.name.clone(),
                });
            }
            let classes = shape
                .fields
                .iter()
                .map(|field| {
                    param_by_name
                        .get(field)
                        .copied()
                        .ok_or_else(|| VocabError::UnknownParameter {
                            event: shape.name.clone(),
                            field: field.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            events.push(EventEntry {
                name: shape.name.clone(),
                id: allocate(&mut next, 1)?,
                fields: shape.fields.clone(),
                classes,
            });
        }

        let mut params = Vec::with_capacity(grammar.params.len());
        for class in &grammar.params {
            params.push(ParamRange {
                name: class.name.clone(),
                base: allocate(&mut next, class.cardinality)?,
                cardinality: class.cardinality,
            });
        }

        Ok(Self {
            events,
            params,
            event_by_name,
            param_by_name,
            first_event_id,
            vocab_size: next,
            max_token_seq: grammar.max_fields() + 1,
        })
    }

    /// The vocabulary of `Grammar::midi()`.
    pub fn midi() -> Self {
        Self::build(&Grammar::midi()).expect("built-in MIDI grammar is well formed")
    }

    pub fn vocab_size(&self) -> u32 {
        self.vocab_size
    }

    /// Compound-token capacity: the widest event plus the type slot.
    pub fn max_token_seq(&self) -> usize {
        self.max_token_seq
    }

    pub fn pad_id(&self) -> TokenId {
        PAD_ID
    }

    pub fn bos_id(&self) -> TokenId {
        BOS_ID
    }

    pub fn eos_id(&self) -> TokenId {
        EOS_ID
    }

    pub fn events(&self) -> &[EventEntry] {
        &self.events
    }

    pub fn params(&self) -> &[ParamRange] {
        &self.params
    }

    pub fn event(&self, name: &str) -> Option<&EventEntry> {
        self.event_by_name.get(name).map(|&i| &self.events[i])
    }

    pub fn event_by_id(&self, id: TokenId) -> Option<&EventEntry> {
        let idx = id.checked_sub(self.first_event_id)? as usize;
        self.events.get(idx)
    }

    pub fn param(&self, class: &str) -> Option<&ParamRange> {
        self.param_by_name.get(class).map(|&i| &self.params[i])
    }

    /// Range of the parameter class at `index` (as stored in `EventEntry`).
    pub fn param_at(&self, index: usize) -> Option<&ParamRange> {
        self.params.get(index)
    }

    /// Encode a semantic field value as a sub-token ID.
    pub fn encode_field(&self, class: &str, value: u32) -> Result<TokenId, VocabError> {
        let range = self
            .param(class)
            .ok_or_else(|| VocabError::UnknownClass(class.to_string()))?;
        range.encode(value).ok_or(VocabError::ValueOutOfRange {
            class: class.to_string(),
            value: i64::from(value),
            cardinality: range.cardinality,
        })
    }

    /// Decode a sub-token ID back to its semantic value within `class`.
    pub fn decode_field(&self, class: &str, raw: TokenId) -> Result<u32, VocabError> {
        let range = self
            .param(class)
            .ok_or_else(|| VocabError::UnknownClass(class.to_string()))?;
        range.decode(raw).ok_or(VocabError::ValueOutOfRange {
            class: class.to_string(),
            value: i64::from(raw) - i64::from(range.base),
            cardinality: range.cardinality,
        })
    }

    /// Build a padded compound token for `event` from its semantic field
    /// values, given in declared order (routing fields included).
    pub fn encode_event(&self, event: &str, values: &[u32]) -> Result<CompoundToken, VocabError> {
        let entry = self
            .event(event)
            .ok_or_else(|| VocabError::UnknownEvent(event.to_string()))?;
        if values.len() != entry.field_count() {
            return Err(VocabError::ArityMismatch {
                event: event.to_string(),
                expected: entry.field_count(),
                actual: values.len(),
            });
        }
        let mut ids = Vec::with_capacity(self.max_token_seq);
        ids.push(entry.id);
        for (field, &value) in entry.fields.iter().zip(values) {
            ids.push(self.encode_field(field, value)?);
        }
        Ok(CompoundToken::padded(&ids, self.max_token_seq))
    }

    /// A compound token carrying only `bos`.
    pub fn bos_token(&self) -> CompoundToken {
        CompoundToken::padded(&[BOS_ID], self.max_token_seq)
    }

    /// Identify what `id` stands for, or `None` if it is past `vocab_size`.
    pub fn classify(&self, id: TokenId) -> Option<TokenClass<'_>> {
        match id {
            PAD_ID => Some(TokenClass::Pad),
            BOS_ID => Some(TokenClass::Bos),
            EOS_ID => Some(TokenClass::Eos),
            _ => {
                if let Some(entry) = self.event_by_id(id) {
                    return Some(TokenClass::Event(&entry.name));
                }
                self.params.iter().find_map(|range| {
                    range.decode(id).map(|value| TokenClass::Param {
                        class: &range.name,
                        value,
                    })
                })
            }
        }
    }
}

/// Reserve `size` consecutive IDs starting at `*next`.
fn allocate(next: &mut TokenId, size: u32) -> Result<TokenId, VocabError> {
    let base = *next;
    *next = next.checked_add(size).ok_or(VocabError::TooLarge)?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{
        CHANNEL, EventShape, NOTE, PATCH_CHANGE, ParamClass, SET_TEMPO, TIME1,
    };

    #[test]
    fn midi_allocation_matches_known_offsets() {
        let v = Vocabulary::midi();
        assert_eq!(v.event(NOTE).unwrap().id, 3);
        assert_eq!(v.event(PATCH_CHANGE).unwrap().id, 4);
        assert_eq!(v.event(SET_TEMPO).unwrap().id, 6);
        let bases: Vec<(&str, TokenId)> = v
            .params()
            .iter()
            .map(|p| (p.name.as_str(), p.base))
            .collect();
        assert_eq!(
            bases,
            [
                ("time1", 7),
                ("time2", 135),
                ("duration", 151),
                ("track", 2199),
                ("channel", 2327),
                ("pitch", 2343),
                ("velocity", 2471),
                ("patch", 2599),
                ("controller", 2727),
                ("value", 2855),
                ("bpm", 2983),
            ]
        );
        assert_eq!(v.vocab_size(), 3239);
        assert_eq!(v.max_token_seq(), 8);
    }

    #[test]
    fn vocab_size_is_reserved_plus_events_plus_classes() {
        let g = Grammar::midi();
        let v = Vocabulary::build(&g).unwrap();
        let classes: u32 = g.params.iter().map(|p| p.cardinality).sum();
        assert_eq!(v.vocab_size(), 3 + g.events.len() as u32 + classes);
    }

    #[test]
    fn identical_grammars_build_identical_vocabularies() {
        let a = Vocabulary::build(&Grammar::midi()).unwrap();
        let b = Vocabulary::build(&Grammar::midi()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_id_has_exactly_one_meaning() {
        let v = Vocabulary::midi();
        for id in 0..v.vocab_size() {
            let class = v.classify(id);
            assert!(class.is_some(), "id {id} is unclassified");
            let owners = v.params().iter().filter(|p| p.contains(id)).count()
                + usize::from(v.event_by_id(id).is_some())
                + usize::from(id <= EOS_ID);
            assert_eq!(owners, 1, "id {id} has {owners} owners");
        }
        assert_eq!(v.classify(v.vocab_size()), None);
    }

    #[test]
    fn every_field_value_round_trips() {
        let v = Vocabulary::midi();
        for range in v.params() {
            for value in 0..range.cardinality {
                let id = v.encode_field(&range.name, value).unwrap();
                assert_eq!(v.decode_field(&range.name, id).unwrap(), value);
            }
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let v = Vocabulary::midi();
        assert!(matches!(
            v.encode_field(CHANNEL, 16),
            Err(VocabError::ValueOutOfRange { cardinality: 16, .. })
        ));
        // One below the channel base belongs to `track`.
        assert_eq!(
            v.decode_field(CHANNEL, 2326),
            Err(VocabError::ValueOutOfRange {
                class: CHANNEL.into(),
                value: -1,
                cardinality: 16,
            })
        );
        assert_eq!(v.param(TIME1).unwrap().decode(3), None);
    }

    #[test]
    fn encode_event_matches_reference_patch_change() {
        let v = Vocabulary::midi();
        let token = v.encode_event(PATCH_CHANGE, &[0, 0, 0, 0, 0]).unwrap();
        assert_eq!(token.as_slice(), &[4, 7, 135, 2199, 2327, 2599, 0, 0]);
        assert!(matches!(
            v.encode_event(PATCH_CHANGE, &[0, 0, 0]),
            Err(VocabError::ArityMismatch { expected: 5, actual: 3, .. })
        ));
    }

    #[test]
    fn output_index_skips_routing_fields() {
        let v = Vocabulary::midi();
        let note = v.event(NOTE).unwrap();
        assert_eq!(note.output_index("duration"), Some(1));
        assert_eq!(note.output_index("velocity"), Some(4));
        assert_eq!(note.output_index("track"), None);
    }

    #[test]
    fn malformed_grammars_are_rejected() {
        let mut dup_event = Grammar::midi();
        dup_event.events.push(dup_event.events[0].clone());
        assert_eq!(
            Vocabulary::build(&dup_event),
            Err(VocabError::DuplicateEvent(NOTE.into()))
        );

        let mut dup_param = Grammar::midi();
        dup_param.params.push(ParamClass::new(CHANNEL, 4));
        assert_eq!(
            Vocabulary::build(&dup_param),
            Err(VocabError::DuplicateParameter(CHANNEL.into()))
        );

        let mut unknown = Grammar::midi();
        unknown
            .events
            .push(EventShape::new("sysex", &["time1", "time2", "track", "blob"]));
        assert!(matches!(
            Vocabulary::build(&unknown),
            Err(VocabError::UnknownParameter { .. })
        ));

        let mut unrouted = Grammar::midi();
        unrouted.events.push(EventShape::new("marker", &["time1", "bpm"]));
        assert!(matches!(
            Vocabulary::build(&unrouted),
            Err(VocabError::MissingRoutingFields { .. })
        ));
    }
}
