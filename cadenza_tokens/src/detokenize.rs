// Streaming detokenizer: compound tokens in, per-track absolute-time events out.
//
// Each compound token is validated independently and either becomes exactly
// one `Event` or is dropped:
//   - slot 0 must be a known event-type ID,
//   - the token must have more slots than the event has fields,
//   - every field must decode inside its parameter class.
// Dropping is all-or-nothing per token and never affects the neighbours, so a
// sampling glitch costs one event rather than the whole batch. Drops are
// counted in `DetokenizeStats` and logged at debug level; the counters are the
// only way to tell expected sampling noise from a decoder that is emitting
// garbage, so hosts should surface them.
//
// Timing: `time1` accumulates into a running coarse clock `t1` that persists
// for the whole session (it is carried between `feed` calls), and the event's
// tick is derived from `t1` and its own `time2`. See `timing.rs`.
//
// After a batch is routed, notes on each track are de-overlapped per
// `(channel, pitch)`: scanning from the latest onset backwards, each note is
// cut short at the next onset of the same key, and notes left with zero
// duration are removed.
//
// Streaming: a later batch can still start a note inside one already decoded,
// but never before `absolute_tick(t1, 0)`, since `time1` and `time2` are never
// negative. So `feed` holds each track's events back from the first note
// that sounds past that horizon onwards, re-resolving them with every new
// batch, and releases them in history order once the clock has moved past
// them. `flush` releases the rest when the session ends. Released events are
// final: the no-overlap guarantee holds across the whole stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::grammar::{BPM, CHANNEL, DURATION, NOTE, PITCH, SET_TEMPO};
use crate::timing::{absolute_tick, bpm_to_tempo, duration_ticks};
use crate::vocab::{TokenId, Vocabulary};

/// One semantic event. `parameters[0]` is the absolute tick; the rest are the
/// event's non-routing fields in declared order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub parameters: Vec<i64>,
}

impl Event {
    pub fn tick(&self) -> i64 {
        self.parameters.first().copied().unwrap_or(0)
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// Events grouped by track index. Callers must not rely on track order.
pub type TrackEvents = BTreeMap<u32, Vec<Event>>;

/// Running counters for dropped tokens and overlap edits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetokenizeStats {
    pub accepted: u64,
    pub dropped_unknown_event: u64,
    pub dropped_short: u64,
    pub dropped_out_of_range: u64,
    pub notes_trimmed: u64,
    pub notes_removed: u64,
}

impl DetokenizeStats {
    /// Total compound tokens dropped as malformed.
    pub fn dropped(&self) -> u64 {
        self.dropped_unknown_event + self.dropped_short + self.dropped_out_of_range
    }
}

/// Detokenizer state for one session: the coarse clock, the counters, and the
/// events held back until no future note can overlap them.
#[derive(Clone, Debug, Default)]
pub struct Detokenizer {
    t1: i64,
    stats: DetokenizeStats,
    held: TrackEvents,
}

impl Detokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously returned coarse clock.
    pub fn with_t1(t1: i64) -> Self {
        Self {
            t1,
            ..Self::default()
        }
    }

    pub fn t1(&self) -> i64 {
        self.t1
    }

    pub fn stats(&self) -> &DetokenizeStats {
        &self.stats
    }

    /// Events decoded but not yet released.
    pub fn held_len(&self) -> usize {
        self.held.values().map(Vec::len).sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Detokenize one batch, advancing the coarse clock. Returns the events
    /// that are now final; the rest stay held for the next call.
    pub fn feed<I>(&mut self, vocab: &Vocabulary, tokens: I) -> TrackEvents
    where
        I: IntoIterator,
        I::Item: AsRef<[TokenId]>,
    {
        for token in tokens {
            if let Some((track, event)) = self.decode_one(vocab, token.as_ref()) {
                self.held.entry(track).or_default().push(event);
            }
        }

        let horizon = absolute_tick(self.t1, 0);
        let dur = vocab.event(NOTE).and_then(|n| n.output_index(DURATION));
        let mut released = TrackEvents::new();
        for (&track, events) in &mut self.held {
            resolve_overlaps(vocab, events, &mut self.stats);
            let settled = events
                .iter()
                .take_while(|e| !e.is(NOTE) || dur.is_none_or(|i| e.tick() + e.parameters[i] <= horizon))
                .count();
            if settled > 0 {
                let rest = events.split_off(settled);
                released.insert(track, std::mem::replace(events, rest));
            }
        }
        self.held.retain(|_, events| !events.is_empty());
        released
    }

    /// Release everything still held. Call once the session has ended.
    pub fn flush(&mut self) -> TrackEvents {
        std::mem::take(&mut self.held)
    }

    fn decode_one(&mut self, vocab: &Vocabulary, ids: &[TokenId]) -> Option<(u32, Event)> {
        let head = ids.first().copied().unwrap_or(TokenId::MAX);
        if head == vocab.bos_id() {
            // Session seeds start with bos; it is structure, not a drop.
            return None;
        }
        let Some(entry) = vocab.event_by_id(head) else {
            self.stats.dropped_unknown_event += 1;
            debug!(head, "dropping compound token with unknown event id");
            return None;
        };
        if ids.len() <= entry.field_count() {
            self.stats.dropped_short += 1;
            debug!(event = %entry.name, len = ids.len(), "dropping truncated compound token");
            return None;
        }

        let mut values: SmallVec<[i64; 8]> = SmallVec::new();
        for (slot, (&class, field)) in entry.classes().iter().zip(&entry.fields).enumerate() {
            let raw = ids[slot + 1];
            let decoded = vocab.param_at(class).and_then(|range| range.decode(raw));
            let Some(value) = decoded else {
                self.stats.dropped_out_of_range += 1;
                debug!(event = %entry.name, %field, raw, "dropping compound token with out-of-range field");
                return None;
            };
            values.push(i64::from(value));
        }

        if entry.name == SET_TEMPO {
            if let Some(i) = entry.field_index(BPM) {
                values[i] = bpm_to_tempo(values[i]);
            }
        } else if entry.name == NOTE {
            if let Some(i) = entry.field_index(DURATION) {
                values[i] = duration_ticks(values[i]);
            }
        }

        // Routing fields are guaranteed to lead by `Vocabulary::build`.
        self.t1 += values[0];
        let tick = absolute_tick(self.t1, values[1]);
        let track = values[2] as u32;

        let mut parameters = Vec::with_capacity(values.len() - 2);
        parameters.push(tick);
        parameters.extend_from_slice(&values[3..]);
        self.stats.accepted += 1;
        Some((
            track,
            Event {
                name: entry.name.clone(),
                parameters,
            },
        ))
    }
}

/// Detokenize a complete token sequence starting from coarse clock `t1`.
///
/// Returns the per-track events and the advanced clock. Nothing is held back;
/// streaming callers that need overlap resolution across calls keep a
/// `Detokenizer` instead.
pub fn detokenize<I>(vocab: &Vocabulary, tokens: I, t1: i64) -> (TrackEvents, i64)
where
    I: IntoIterator,
    I::Item: AsRef<[TokenId]>,
{
    let mut detok = Detokenizer::with_t1(t1);
    let mut tracks = detok.feed(vocab, tokens);
    for (track, events) in detok.flush() {
        tracks.entry(track).or_default().extend(events);
    }
    (tracks, detok.t1())
}

/// Clamp same-key note durations so no two notes overlap, then drop notes
/// whose duration reached zero.
fn resolve_overlaps(vocab: &Vocabulary, events: &mut Vec<Event>, stats: &mut DetokenizeStats) {
    let Some(note) = vocab.event(NOTE) else {
        return;
    };
    let (Some(dur), Some(chan), Some(pitch)) = (
        note.output_index(DURATION),
        note.output_index(CHANNEL),
        note.output_index(PITCH),
    ) else {
        return;
    };

    let mut order: Vec<usize> = (0..events.len()).filter(|&i| events[i].is(NOTE)).collect();
    // Stable, so equal onsets keep history order.
    order.sort_by(|&a, &b| events[b].tick().cmp(&events[a].tick()));

    let mut next_onset: BTreeMap<(i64, i64), i64> = BTreeMap::new();
    let mut removed = vec![false; events.len()];
    for i in order {
        let params = &mut events[i].parameters;
        let t = params[0];
        let key = (params[chan], params[pitch]);
        let mut d = params[dur];
        if let Some(&next) = next_onset.get(&key) {
            let clamped = d.min((next - t).max(0));
            if clamped < d {
                stats.notes_trimmed += 1;
            }
            d = clamped;
        }
        next_onset.insert(key, t);
        params[dur] = d;
        if d == 0 {
            removed[i] = true;
            stats.notes_removed += 1;
        }
    }

    let mut idx = 0;
    events.retain(|_| {
        let keep = !removed[idx];
        idx += 1;
        keep
    });
}
