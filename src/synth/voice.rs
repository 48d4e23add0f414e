use crate::config::AudioConfig;
use crate::control::MAX_VOICES;

use super::engine::{EngineError, SynthBackend, SynthEngine};

/// One engine instance bound to a voice slot
pub struct Voice {
    slot: usize,
    engine: Box<dyn SynthEngine>,
}

impl Voice {
    pub fn process(&mut self, f0_hz: f32, loudness: f32) -> Result<Vec<i16>, EngineError> {
        self.engine.process(f0_hz, loudness).inspect_err(|e| {
            tracing::debug!(slot = self.slot, f0_hz, error = %e, "voice failed");
        })
    }
}

/// Fixed set of voices, all allocated up front so no engine is built mid-stream
pub struct VoiceBank {
    voices: Vec<Voice>,
}

impl VoiceBank {
    /// Allocate all voice slots. Any failure here is fatal to the session.
    pub fn new(backend: &dyn SynthBackend, audio: &AudioConfig) -> Result<Self, EngineError> {
        let engines = backend.create_voices(audio, MAX_VOICES)?;
        if engines.len() != MAX_VOICES {
            return Err(EngineError::VoiceCount {
                expected: MAX_VOICES,
                got: engines.len(),
            });
        }
        Ok(Self::from_engines(engines))
    }

    pub fn from_engines(engines: Vec<Box<dyn SynthEngine>>) -> Self {
        let voices = engines
            .into_iter()
            .enumerate()
            .map(|(slot, engine)| Voice { slot, engine })
            .collect();
        Self { voices }
    }

    /// Render one frame from the voice in `slot`
    pub fn process(&mut self, slot: usize, f0_hz: f32, loudness: f32) -> Result<Vec<i16>, EngineError> {
        self.voices
            .get_mut(slot)
            .ok_or(EngineError::NoSuchVoice(slot))?
            .process(f0_hz, loudness)
    }
}
