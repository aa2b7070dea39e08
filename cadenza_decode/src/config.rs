// Generation session configuration.
//
// `GenerationConfig` carries every knob a session reads: instrument preset,
// length cap, sampling parameters, event bans, seed, and streaming batch size.
// It is plain data, deserializable from JSON with every field optional
// (missing fields take the defaults below), and validated once when a
// `Decoder` is constructed. The decoder never mutates it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GenerateError;
use crate::preset::InstrumentPreset;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub instrument_preset: InstrumentPreset,
    /// Cap on total history length, seed prefix included.
    pub max_sequence_length: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub disable_control_change: bool,
    /// Base seed; each session derives its own stream from it.
    pub seed: u64,
    /// Compound tokens per streamed chunk.
    pub yield_every: usize,
    /// Restrict every field to its parameter class's legal IDs.
    pub strict_fields: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            instrument_preset: InstrumentPreset::PopRock,
            max_sequence_length: 256,
            temperature: 1.0,
            top_p: 0.98,
            top_k: 20,
            disable_control_change: true,
            seed: 0,
            yield_every: 1,
            strict_fields: false,
        }
    }
}

impl GenerationConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let config: GenerationConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GenerateError> {
        let invalid = |msg: String| Err(GenerateError::InvalidConfig(msg));
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return invalid(format!("temperature must be positive, got {}", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return invalid(format!("top_p must lie in [0, 1], got {}", self.top_p));
        }
        if self.top_k == 0 {
            return invalid("top_k must be at least 1".into());
        }
        if self.max_sequence_length == 0 {
            return invalid("max_sequence_length must be at least 1".into());
        }
        if self.yield_every == 0 {
            return invalid("yield_every must be at least 1".into());
        }
        Ok(())
    }
}
