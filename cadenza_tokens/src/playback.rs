// Playback-side scheduling of detokenized events.
//
// `PlaybackSchedule` is the reference consumer of the detokenizer's output:
// it keeps one FIFO per track, and on each audio callback the host asks for
// everything due at the current wall-clock offset. Ticks become seconds
// through the current tempo, which changes whenever a `set_tempo` event is
// drained. The timeline is piecewise: a tempo change re-anchors the clock at
// the tempo event's tick so earlier events keep their timing.
//
// Nothing here talks to an audio device; the host owns synthesis.

use std::collections::{BTreeMap, VecDeque};

use crate::detokenize::{Event, TrackEvents};
use crate::grammar::SET_TEMPO;
use crate::timing::{TICKS_PER_BEAT, tempo_to_bpm};

/// Tempo assumed until the first `set_tempo` is drained.
pub const DEFAULT_BPM: f64 = 120.0;

/// Per-track playback queues with a tempo-aware clock.
#[derive(Clone, Debug)]
pub struct PlaybackSchedule {
    queues: BTreeMap<u32, VecDeque<Event>>,
    bpm: f64,
    anchor_tick: i64,
    anchor_secs: f64,
}

impl Default for PlaybackSchedule {
    fn default() -> Self {
        Self {
            queues: BTreeMap::new(),
            bpm: DEFAULT_BPM,
            anchor_tick: 0,
            anchor_secs: 0.0,
        }
    }
}

impl PlaybackSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Append a detokenized batch. Batches must arrive in history order.
    pub fn enqueue(&mut self, tracks: TrackEvents) {
        for (track, events) in tracks {
            self.queues.entry(track).or_default().extend(events);
        }
    }

    /// Events still waiting to be played, across all tracks.
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Note length in milliseconds at the current tempo.
    pub fn ticks_to_millis(&self, ticks: i64) -> i64 {
        let beats = ticks as f64 / TICKS_PER_BEAT as f64;
        (beats / self.bpm * 60_000.0) as i64
    }

    /// Absolute tick reached `secs` after playback started.
    pub fn seconds_to_ticks(&self, secs: f64) -> i64 {
        let beats = (secs - self.anchor_secs) / 60.0 * self.bpm;
        self.anchor_tick + (beats * TICKS_PER_BEAT as f64) as i64
    }

    /// Remove and return every event whose tick lies before the playhead at
    /// `elapsed_secs`, in tick order across tracks.
    pub fn drain_due(&mut self, elapsed_secs: f64) -> Vec<(u32, Event)> {
        let mut due = Vec::new();
        loop {
            let playhead = self.seconds_to_ticks(elapsed_secs);
            let next = self
                .queues
                .iter()
                .filter_map(|(&track, q)| q.front().map(|e| (e.tick(), track)))
                .min();
            let Some((tick, track)) = next else {
                break;
            };
            if tick >= playhead {
                break;
            }
            let Some(event) = self.queues.get_mut(&track).and_then(VecDeque::pop_front) else {
                break;
            };
            if event.is(SET_TEMPO) {
                self.observe_tempo(&event);
            }
            due.push((track, event));
        }
        self.queues.retain(|_, q| !q.is_empty());
        due
    }

    fn observe_tempo(&mut self, event: &Event) {
        let Some(&tempo) = event.parameters.get(1) else {
            return;
        };
        let bpm = tempo_to_bpm(tempo);
        if !(bpm.is_finite() && bpm > 0.0) {
            return;
        }
        let tick = event.tick();
        let beats = (tick - self.anchor_tick) as f64 / TICKS_PER_BEAT as f64;
        self.anchor_secs += beats * 60.0 / self.bpm;
        self.anchor_tick = tick;
        self.bpm = bpm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::NOTE;

    fn ev(name: &str, parameters: &[i64]) -> Event {
        Event {
            name: name.to_string(),
            parameters: parameters.to_vec(),
        }
    }

    #[test]
    fn converts_ticks_at_default_tempo() {
        let s = PlaybackSchedule::new();
        assert_eq!(s.ticks_to_millis(480), 500);
        assert_eq!(s.seconds_to_ticks(1.0), 960);
    }

    #[test]
    fn drains_in_tick_order_across_tracks() {
        let mut s = PlaybackSchedule::new();
        let mut batch = TrackEvents::new();
        batch.insert(0, vec![ev(NOTE, &[0, 240, 0, 60, 90]), ev(NOTE, &[960, 240, 0, 62, 90])]);
        batch.insert(3, vec![ev(NOTE, &[480, 240, 1, 64, 90])]);
        s.enqueue(batch);
        assert_eq!(s.pending(), 3);

        let first = s.drain_due(0.6);
        let ticks: Vec<(u32, i64)> = first.iter().map(|(t, e)| (*t, e.tick())).collect();
        assert_eq!(ticks, vec![(0, 0), (3, 480)]);
        assert_eq!(s.drain_due(1.01).len(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn tempo_change_reanchors_the_clock() {
        let mut s = PlaybackSchedule::new();
        let mut batch = TrackEvents::new();
        // Switch to 60 bpm at tick 480 (0.5 s in at 120 bpm).
        batch.insert(
            0,
            vec![ev(SET_TEMPO, &[480, 1_000_000]), ev(NOTE, &[960, 480, 0, 60, 90])],
        );
        s.enqueue(batch);

        assert_eq!(s.drain_due(0.6).len(), 1);
        assert_eq!(s.bpm(), 60.0);
        // At 60 bpm the note at tick 960 sounds one second after the change.
        assert!(s.drain_due(1.4).is_empty());
        assert_eq!(s.drain_due(1.51).len(), 1);
    }
}
