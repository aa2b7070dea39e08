// Tick, tempo, and duration conversions.
//
// Token time is quantized to sixteenths of a beat: `time1` counts coarse
// steps (accumulated across a whole session), `time2` is the fine offset
// within one step, and `duration` is a count of sixteenths. Output events use
// absolute MIDI ticks at `TICKS_PER_BEAT` resolution.

/// Ticks per quarter note in detokenized output.
pub const TICKS_PER_BEAT: i64 = 480;

/// Fine time steps per beat.
pub const STEPS_PER_BEAT: i64 = 16;

/// Tempo used when a `set_tempo` carries bpm 0: one beat per second.
pub const ZERO_BPM_TEMPO: i64 = 60_000_000;

/// Absolute tick for an accumulated coarse time `t1` and fine offset `t2`.
pub fn absolute_tick(t1: i64, t2: i64) -> i64 {
    (t1 * STEPS_PER_BEAT + t2) * TICKS_PER_BEAT / STEPS_PER_BEAT
}

/// Ticks spanned by a quantized duration index.
pub fn duration_ticks(index: i64) -> i64 {
    index * TICKS_PER_BEAT / STEPS_PER_BEAT
}

/// Beats per minute to microseconds per quarter note.
pub fn bpm_to_tempo(bpm: i64) -> i64 {
    if bpm == 0 {
        return ZERO_BPM_TEMPO;
    }
    (60.0 / bpm as f64 * 1_000_000.0).round() as i64
}

/// Microseconds per quarter note back to beats per minute.
pub fn tempo_to_bpm(tempo: i64) -> f64 {
    60.0 / (tempo as f64 / 1_000_000.0)
}
