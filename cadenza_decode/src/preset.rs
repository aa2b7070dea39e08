// Instrument presets: fixed patch-change prefixes plus channel bans.
//
// A preset seeds the history with `bos` followed by one `patch_change` per
// instrument, all at time zero, and lists the MIDI channels the model may not
// use afterwards (the channels with no instrument assigned). Because the
// instruments are fixed, sessions with a preset also forbid the model from
// emitting further `patch_change` events.
//
// Assignments are kept as semantic `(track, channel, patch)` triples and
// encoded through the vocabulary, so they stay valid under any ID layout.
// Patch numbers are General MIDI programs (0 = acoustic grand, 24 = nylon
// guitar, 40 = violin, and so on).

use std::fmt;
use std::str::FromStr;

use cadenza_tokens::grammar::PATCH_CHANGE;
use cadenza_tokens::{CompoundToken, VocabError, Vocabulary};
use serde::{Deserialize, Serialize};

/// One instrument slot in a preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchAssignment {
    pub track: u32,
    pub channel: u32,
    pub patch: u32,
}

const fn slot(track: u32, channel: u32, patch: u32) -> PatchAssignment {
    PatchAssignment {
        track,
        channel,
        patch,
    }
}

const PIANO: &[PatchAssignment] = &[slot(0, 0, 0)];

const ORCHESTRA: &[PatchAssignment] = &[
    slot(0, 0, 40),
    slot(1, 1, 41),
    slot(2, 2, 42),
    slot(3, 3, 43),
    slot(4, 4, 56),
    slot(5, 5, 60),
    slot(6, 6, 61),
    slot(7, 7, 73),
    slot(8, 8, 72),
    slot(9, 10, 58),
    slot(10, 11, 57),
    slot(11, 12, 47),
    slot(12, 9, 48),
];

const POP_ROCK: &[PatchAssignment] = &[
    slot(0, 0, 24),
    slot(1, 1, 25),
    slot(2, 2, 26),
    slot(3, 3, 27),
    slot(4, 4, 28),
    slot(5, 5, 29),
    slot(6, 6, 30),
    slot(7, 7, 33),
    slot(8, 9, 0),
];

/// Which instrument prefix and channel bans a session starts with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentPreset {
    /// No prefix beyond `bos`; the model picks instruments itself.
    None,
    Piano,
    Orchestra,
    #[default]
    PopRock,
}

impl InstrumentPreset {
    pub const ALL: [InstrumentPreset; 4] = [
        InstrumentPreset::None,
        InstrumentPreset::Piano,
        InstrumentPreset::Orchestra,
        InstrumentPreset::PopRock,
    ];

    pub fn patches(self) -> &'static [PatchAssignment] {
        match self {
            InstrumentPreset::None => &[],
            InstrumentPreset::Piano => PIANO,
            InstrumentPreset::Orchestra => ORCHESTRA,
            InstrumentPreset::PopRock => POP_ROCK,
        }
    }

    /// MIDI channels the model may not emit in a `channel` field.
    pub fn disabled_channels(self) -> &'static [u32] {
        match self {
            InstrumentPreset::None => &[],
            InstrumentPreset::Piano => &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            InstrumentPreset::Orchestra => &[13, 14, 15],
            InstrumentPreset::PopRock => &[8, 10, 11, 12, 13, 14, 15],
        }
    }

    /// Whether the preset pins instruments, which also bans `patch_change`.
    pub fn fixes_patches(self) -> bool {
        !self.patches().is_empty()
    }

    /// Seed history for a session: `bos`, then one patch change per slot.
    pub fn prefix(self, vocab: &Vocabulary) -> Result<Vec<CompoundToken>, VocabError> {
        let mut tokens = Vec::with_capacity(self.patches().len() + 1);
        tokens.push(vocab.bos_token());
        for p in self.patches() {
            tokens.push(vocab.encode_event(PATCH_CHANGE, &[0, 0, p.track, p.channel, p.patch])?);
        }
        Ok(tokens)
    }
}

impl fmt::Display for InstrumentPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentPreset::None => "none",
            InstrumentPreset::Piano => "piano",
            InstrumentPreset::Orchestra => "orchestra",
            InstrumentPreset::PopRock => "pop_rock",
        };
        f.write_str(name)
    }
}

impl FromStr for InstrumentPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(InstrumentPreset::None),
            "piano" => Ok(InstrumentPreset::Piano),
            "orchestra" => Ok(InstrumentPreset::Orchestra),
            "pop_rock" | "poprock" => Ok(InstrumentPreset::PopRock),
            other => Err(format!("unknown instrument preset '{other}'")),
        }
    }
}
