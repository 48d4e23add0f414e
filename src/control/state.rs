use parking_lot::RwLock;

use super::message::ControlUpdate;

/// Maximum number of simultaneously sounding voices
pub const MAX_VOICES: usize = 3;

pub const DEFAULT_PITCH_HZ: f32 = 440.0;
pub const DEFAULT_LOUDNESS: f32 = 0.5;

/// Up to three active pitches in Hz, in voice-slot order.
/// Only positive finite values are ever stored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pitches {
    values: [f32; MAX_VOICES],
    len: usize,
}

impl Pitches {
    pub const fn silent() -> Self {
        Self {
            values: [0.0; MAX_VOICES],
            len: 0,
        }
    }

    pub fn single(pitch: f32) -> Self {
        let mut pitches = Self::silent();
        pitches.push(pitch);
        pitches
    }

    /// Keep the first three valid entries, dropping anything not > 0
    pub fn from_values<I: IntoIterator<Item = f32>>(values: I) -> Self {
        let mut pitches = Self::silent();
        for value in values {
            if pitches.len == MAX_VOICES {
                break;
            }
            pitches.push(value);
        }
        pitches
    }

    /// Append a pitch. Returns false when the value was rejected or the set is full.
    pub fn push(&mut self, pitch: f32) -> bool {
        if self.len == MAX_VOICES || !is_valid_pitch(pitch) {
            return false;
        }
        self.values[self.len] = pitch;
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }
}

impl Default for Pitches {
    fn default() -> Self {
        Self::single(DEFAULT_PITCH_HZ)
    }
}

pub fn is_valid_pitch(pitch: f32) -> bool {
    pitch.is_finite() && pitch > 0.0
}

/// Latest known pitch and loudness for a session
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlState {
    pub pitches: Pitches,
    pub loudness: f32,
}

impl ControlState {
    pub fn voice_count(&self) -> usize {
        self.pitches.len()
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            pitches: Pitches::default(),
            loudness: DEFAULT_LOUDNESS,
        }
    }
}

/// Session-scoped cell shared between the control receiver and the frame scheduler.
///
/// Writers replace whole fields under the write lock, so a snapshot never
/// observes an update half-applied.
pub struct ControlCell {
    state: RwLock<ControlState>,
}

impl ControlCell {
    pub fn new() -> Self {
        Self::with_state(ControlState::default())
    }

    pub fn with_state(state: ControlState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Apply every field the update carries. Returns false if it carried none.
    pub fn update(&self, update: &ControlUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        let mut state = self.state.write();
        if let Some(pitches) = update.pitches {
            state.pitches = pitches;
        }
        if let Some(loudness) = update.loudness {
            state.loudness = loudness;
        }
        true
    }

    pub fn snapshot(&self) -> ControlState {
        *self.state.read()
    }
}

impl Default for ControlCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn default_state_is_one_voice_mid_loudness() {
        let cell = ControlCell::new();
        let state = cell.snapshot();
        assert_eq!(state.pitches.as_slice(), &[440.0]);
        assert_eq!(state.loudness, 0.5);
    }

    #[test]
    fn pitches_keep_first_three_positive() {
        let p = Pitches::from_values([100.0, -3.0, 0.0, 200.0, f32::NAN, 300.0, 400.0]);
        assert_eq!(p.as_slice(), &[100.0, 200.0, 300.0]);
        assert_eq!(Pitches::from_values([f32::INFINITY]).len(), 0);
    }

    #[test]
    fn update_applies_only_present_fields() {
        let cell = ControlCell::new();
        cell.update(&ControlUpdate {
            pitches: None,
            loudness: Some(0.9),
        });
        let state = cell.snapshot();
        assert_eq!(state.pitches.as_slice(), &[440.0]);
        assert_eq!(state.loudness, 0.9);

        cell.update(&ControlUpdate {
            pitches: Some(Pitches::silent()),
            loudness: None,
        });
        let state = cell.snapshot();
        assert!(state.pitches.is_empty());
        assert_eq!(state.loudness, 0.9);

        assert!(!cell.update(&ControlUpdate::default()));
    }

    #[test]
    fn snapshots_never_see_partial_updates() {
        // Writers always pair pitch count with loudness; readers must agree.
        let cell = Arc::new(ControlCell::with_state(ControlState {
            pitches: Pitches::single(1.0),
            loudness: 1.0,
        }));

        let writer = {
            let cell = cell.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    let n = (i % 3) + 1;
                    let pitches = Pitches::from_values((0..n).map(|k| 100.0 + k as f32));
                    cell.update(&ControlUpdate {
                        pitches: Some(pitches),
                        loudness: Some(n as f32),
                    });
                }
            })
        };

        for _ in 0..10_000 {
            let state = cell.snapshot();
            assert_eq!(state.voice_count() as f32, state.loudness);
        }
        writer.join().unwrap();
    }
}
