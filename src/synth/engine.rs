use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::AudioConfig;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("Failed to read model {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse model {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Backend produced {got} voices, expected {expected}")]
    VoiceCount { expected: usize, got: usize },
    #[error("No voice in slot {0}")]
    NoSuchVoice(usize),
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
}

/// One synthesis voice: given a pitch and loudness, yields one frame of audio.
/// Must be Send so the session thread can own it.
pub trait SynthEngine: Send {
    /// Render the next frame. `f0_hz` is positive; `loudness` is nominally 0..1.
    fn process(&mut self, f0_hz: f32, loudness: f32) -> Result<Vec<i16>, EngineError>;
}

/// Creates the engines for one session's voice bank
pub trait SynthBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Build `count` independent engines sharing one loaded model
    fn create_voices(
        &self,
        audio: &AudioConfig,
        count: usize,
    ) -> Result<Vec<Box<dyn SynthEngine>>, EngineError>;
}
