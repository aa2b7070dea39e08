// Event grammar: which event types exist and which fields each one carries.
//
// A `Grammar` is pure configuration. It lists the event types in allocation
// order, each with its ordered field names (its "shape"), and the parameter
// classes with their cardinalities, also in allocation order. A parameter
// class is shared by every event that names a field after it, so `channel`
// is one ID range used by `note`, `patch_change`, and `control_change`.
//
// `Grammar::midi()` is the canonical grammar the pretrained scoring models
// were trained against. Its parameter-class order is load-bearing: instrument
// presets and any serialized token history assume these exact base offsets,
// so do not reorder the table.
//
// See also: `vocab.rs`, which turns a `Grammar` into concrete ID ranges.

use serde::{Deserialize, Serialize};

pub const NOTE: &str = "note";
pub const PATCH_CHANGE: &str = "patch_change";
pub const CONTROL_CHANGE: &str = "control_change";
pub const SET_TEMPO: &str = "set_tempo";

pub const TIME1: &str = "time1";
pub const TIME2: &str = "time2";
pub const TRACK: &str = "track";
pub const DURATION: &str = "duration";
pub const CHANNEL: &str = "channel";
pub const PITCH: &str = "pitch";
pub const VELOCITY: &str = "velocity";
pub const PATCH: &str = "patch";
pub const CONTROLLER: &str = "controller";
pub const VALUE: &str = "value";
pub const BPM: &str = "bpm";

/// The three fields every event starts with. They are consumed by the
/// detokenizer for timing and routing and never appear in output parameters.
pub const ROUTING_FIELDS: [&str; 3] = [TIME1, TIME2, TRACK];

/// One event type and its ordered fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventShape {
    pub name: String,
    pub fields: Vec<String>,
}

impl EventShape {
    pub fn new(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// A parameter class: a named value domain `[0, cardinality)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamClass {
    pub name: String,
    pub cardinality: u32,
}

impl ParamClass {
    pub fn new(name: &str, cardinality: u32) -> Self {
        Self {
            name: name.to_string(),
            cardinality,
        }
    }
}

/// Complete event grammar, in allocation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grammar {
    pub events: Vec<EventShape>,
    pub params: Vec<ParamClass>,
}

impl Grammar {
    /// The MIDI grammar: four event types over eleven parameter classes.
    pub fn midi() -> Self {
        Self {
            events: vec![
                EventShape::new(
                    NOTE,
                    &[TIME1, TIME2, TRACK, DURATION, CHANNEL, PITCH, VELOCITY],
                ),
                EventShape::new(PATCH_CHANGE, &[TIME1, TIME2, TRACK, CHANNEL, PATCH]),
                EventShape::new(
                    CONTROL_CHANGE,
                    &[TIME1, TIME2, TRACK, CHANNEL, CONTROLLER, VALUE],
                ),
                EventShape::new(SET_TEMPO, &[TIME1, TIME2, TRACK, BPM]),
            ],
            params: vec![
                ParamClass::new(TIME1, 128),
                ParamClass::new(TIME2, 16),
                ParamClass::new(DURATION, 2048),
                ParamClass::new(TRACK, 128),
                ParamClass::new(CHANNEL, 16),
                ParamClass::new(PITCH, 128),
                ParamClass::new(VELOCITY, 128),
                ParamClass::new(PATCH, 128),
                ParamClass::new(CONTROLLER, 128),
                ParamClass::new(VALUE, 128),
                ParamClass::new(BPM, 256),
            ],
        }
    }

    /// Largest field count across all event types.
    pub fn max_fields(&self) -> usize {
        self.events.iter().map(|e| e.fields.len()).max().unwrap_or(0)
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::midi()
    }
}
