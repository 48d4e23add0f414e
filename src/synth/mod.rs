pub mod ddsp;
pub mod engine;
pub mod harmonic;
pub mod model;
pub mod noise;
pub mod voice;

pub use ddsp::{DdspBackend, DdspEngine, PITCH_MAX_HZ, PITCH_MIN_HZ};
pub use engine::{EngineError, SynthBackend, SynthEngine};
pub use model::TimbreModel;
pub use voice::{Voice, VoiceBank};
