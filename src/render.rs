use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config::AudioConfig;
use crate::control::ControlState;
use crate::session::Session;
use crate::synth::{SynthBackend, VoiceBank};

/// Result of an export operation
pub struct ExportResult {
    pub duration_secs: f32,
    pub samples: usize,
}

/// Render `seconds` of a fixed control state, frame by frame, through the
/// same voice bank and mixer a live session uses.
pub fn render_frames(
    backend: &dyn SynthBackend,
    audio: AudioConfig,
    state: &ControlState,
    seconds: f32,
) -> Result<Vec<i16>> {
    if !seconds.is_finite() || seconds <= 0.0 {
        bail!("Render length must be positive, got {}", seconds);
    }
    let wanted = (seconds as f64 * audio.sample_rate as f64).round() as usize;
    let frames = wanted.div_ceil(audio.frame_samples()).max(1);

    let voices = VoiceBank::new(backend, &audio).context("Failed to create voices")?;
    let mut session = Session::new(voices, audio);

    let mut output = Vec::with_capacity(frames * audio.frame_samples());
    for index in 0..frames {
        let frame = session
            .render_frame(state)
            .with_context(|| format!("Synthesis failed at frame {}", index))?;
        output.extend_from_slice(&frame);
    }
    Ok(output)
}

/// Render and export audio as a 16-bit mono WAV file
pub fn export_wav(
    backend: &dyn SynthBackend,
    audio: AudioConfig,
    state: &ControlState,
    seconds: f32,
    path: &Path,
) -> Result<ExportResult> {
    let samples = render_frames(backend, audio, state, seconds)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    for sample in &samples {
        writer.write_sample(*sample)?;
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;

    Ok(ExportResult {
        duration_secs: samples.len() as f32 / audio.sample_rate as f32,
        samples: samples.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Pitches;
    use crate::synth::{EngineError, SynthEngine};

    struct Constant(i16);

    impl SynthEngine for Constant {
        fn process(&mut self, _f0_hz: f32, _loudness: f32) -> Result<Vec<i16>, EngineError> {
            Ok(vec![self.0; 160])
        }
    }

    struct ConstantBackend;

    impl SynthBackend for ConstantBackend {
        fn name(&self) -> &str {
            "constant"
        }

        fn create_voices(
            &self,
            _audio: &AudioConfig,
            count: usize,
        ) -> Result<Vec<Box<dyn SynthEngine>>, EngineError> {
            Ok((0..count)
                .map(|slot| Box::new(Constant(100 * (slot as i16 + 1))) as Box<dyn SynthEngine>)
                .collect())
        }
    }

    fn audio() -> AudioConfig {
        AudioConfig::new(16_000, 10).unwrap()
    }

    fn state(pitches: &[f32]) -> ControlState {
        ControlState {
            pitches: Pitches::from_values(pitches.iter().copied()),
            loudness: 0.5,
        }
    }

    #[test]
    fn renders_whole_frames() {
        let samples = render_frames(&ConstantBackend, audio(), &state(&[440.0]), 0.025).unwrap();
        // 25 ms at 10 ms frames rounds up to three frames
        assert_eq!(samples.len(), 480);
        assert!(samples.iter().all(|s| *s == 100));
    }

    #[test]
    fn chords_are_mixed() {
        let samples =
            render_frames(&ConstantBackend, audio(), &state(&[220.0, 330.0]), 0.01).unwrap();
        assert!(samples.iter().all(|s| *s == 150));
    }

    #[test]
    fn rejects_non_positive_length() {
        assert!(render_frames(&ConstantBackend, audio(), &state(&[]), 0.0).is_err());
    }

    #[test]
    fn writes_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let result = export_wav(&ConstantBackend, audio(), &state(&[]), 0.02, &path).unwrap();
        assert_eq!(result.samples, 320);
        assert!((result.duration_secs - 0.02).abs() < 1e-6);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 320);
    }
}
