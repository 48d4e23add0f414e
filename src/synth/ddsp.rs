use std::path::PathBuf;
use std::sync::Arc;

use super::engine::{EngineError, SynthBackend, SynthEngine};
use super::harmonic::HarmonicSynth;
use super::model::TimbreModel;
use super::noise::NoiseSynth;
use crate::config::AudioConfig;

/// MIDI note 0
pub const PITCH_MIN_HZ: f32 = 8.18;
/// MIDI note 127
pub const PITCH_MAX_HZ: f32 = 12543.84;

/// Harmonic-plus-noise voice driven by a static timbre model
pub struct DdspEngine {
    model: Arc<TimbreModel>,
    harmonic: HarmonicSynth,
    noise: NoiseSynth,
    buffer: Vec<f32>,
}

impl DdspEngine {
    pub fn new(model: Arc<TimbreModel>, audio: &AudioConfig, seed: u32) -> Self {
        let harmonic = HarmonicSynth::new(model.harmonics.len(), audio.sample_rate as f32);
        let noise = NoiseSynth::new(&model.noise_magnitudes, seed);
        Self {
            model,
            harmonic,
            noise,
            buffer: vec![0.0; audio.frame_samples()],
        }
    }

    /// Linear amplitude for a normalized loudness, over the model's dB range
    pub fn loudness_to_amplitude(&self, loudness: f32) -> f32 {
        if !loudness.is_finite() || loudness <= 0.0 {
            return 0.0;
        }
        let db = (loudness.min(1.0) - 1.0) * self.model.loudness_range_db;
        10.0f32.powf(db / 20.0)
    }
}

impl SynthEngine for DdspEngine {
    fn process(&mut self, f0_hz: f32, loudness: f32) -> Result<Vec<i16>, EngineError> {
        if !f0_hz.is_finite() {
            return Err(EngineError::Synthesis(format!("non-finite pitch {}", f0_hz)));
        }
        let f0 = f0_hz.clamp(PITCH_MIN_HZ, PITCH_MAX_HZ);
        let amplitude = self.loudness_to_amplitude(loudness);

        self.buffer.fill(0.0);
        self.harmonic.render(
            &self.model.harmonics,
            amplitude * self.model.harmonic_gain,
            f0,
            &mut self.buffer,
        );
        self.noise
            .render(amplitude * self.model.noise_gain, &mut self.buffer);

        Ok(self.buffer.iter().map(|s| to_i16(*s)).collect())
    }
}

/// Clip to [-1, 1] and scale to int16
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Loads a timbre model from disk once per session and shares it across voices
pub struct DdspBackend {
    model_path: PathBuf,
}

impl DdspBackend {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }
}

impl SynthBackend for DdspBackend {
    fn name(&self) -> &str {
        "ddsp"
    }

    fn create_voices(
        &self,
        audio: &AudioConfig,
        count: usize,
    ) -> Result<Vec<Box<dyn SynthEngine>>, EngineError> {
        let model = Arc::new(TimbreModel::load(&self.model_path)?);
        tracing::debug!(
            model = %model.name,
            harmonics = model.harmonics.len(),
            noise_taps = model.noise_taps(),
            "timbre model loaded"
        );
        Ok((0..count)
            .map(|slot| {
                let seed = 12345u32.wrapping_add(slot as u32 * 7919);
                Box::new(DdspEngine::new(model.clone(), audio, seed)) as Box<dyn SynthEngine>
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn engine() -> DdspEngine {
        DdspEngine::new(Arc::new(TimbreModel::default()), &AudioConfig::default(), 1)
    }

    #[test]
    fn frames_have_configured_length() {
        let mut engine = engine();
        let frame = engine.process(440.0, 0.5).unwrap();
        assert_eq!(frame.len(), 960);
        assert!(frame.iter().any(|s| *s != 0));
    }

    #[test]
    fn zero_loudness_is_silent() {
        let mut engine = engine();
        let frame = engine.process(440.0, 0.0).unwrap();
        assert!(frame.iter().all(|s| *s == 0));
    }

    #[test]
    fn loudness_maps_over_model_range() {
        let engine = engine();
        assert_eq!(engine.loudness_to_amplitude(1.0), 1.0);
        assert!((engine.loudness_to_amplitude(0.5) - 0.1).abs() < 1e-6);
        assert_eq!(engine.loudness_to_amplitude(2.0), 1.0);
        assert_eq!(engine.loudness_to_amplitude(-1.0), 0.0);
    }

    #[test]
    fn full_loudness_is_loud() {
        let mut engine = engine();
        for _ in 0..5 {
            // Steady tone at full loudness, after the fade-in of the first frame
            let frame = engine.process(110.0, 1.0).unwrap();
            assert!(frame.iter().any(|s| s.unsigned_abs() > 5_000));
        }
    }

    #[test]
    fn to_i16_clips() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-2.0), -32767);
        assert_eq!(to_i16(0.5), 16383);
    }

    #[test]
    fn backend_shares_one_model_across_voices() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"name": "test", "harmonics": [1.0]}"#)
            .unwrap();
        let backend = DdspBackend::new(file.path());
        let mut voices = backend.create_voices(&AudioConfig::default(), 3).unwrap();
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[2].process(220.0, 1.0).unwrap().len(), 960);
    }

    #[test]
    fn backend_reports_missing_model() {
        let backend = DdspBackend::new("/no/such/model.json");
        let err = backend
            .create_voices(&AudioConfig::default(), 3)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
    }
}
