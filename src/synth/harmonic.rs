use std::f64::consts::TAU;

/// Additive synthesizer: a bank of harmonics locked to one fundamental.
///
/// Pitch and per-harmonic amplitude glide over the first half of each
/// frame and hold for the second half, which keeps frame-rate control
/// changes from swooping audibly.
pub struct HarmonicSynth {
    sample_rate: f32,
    /// Running phase of the fundamental, wrapped to one turn
    phase: f64,
    previous_f0: Option<f32>,
    previous_amps: Vec<f32>,
    target_amps: Vec<f32>,
}

impl HarmonicSynth {
    pub fn new(num_harmonics: usize, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            phase: 0.0,
            previous_f0: None,
            previous_amps: vec![0.0; num_harmonics],
            target_amps: vec![0.0; num_harmonics],
        }
    }

    /// Add one frame of harmonics into `out`
    pub fn render(&mut self, distribution: &[f32], amplitude: f32, f0_hz: f32, out: &mut [f32]) {
        self.set_targets(distribution, amplitude, f0_hz);

        let n = out.len();
        let half = n / 2;
        let start_f0 = self.previous_f0.unwrap_or(f0_hz);
        let step = TAU / self.sample_rate as f64;

        for (s, sample) in out.iter_mut().enumerate() {
            let t = if s < half { s as f32 / half as f32 } else { 1.0 };
            let f = start_f0 + (f0_hz - start_f0) * t;
            self.phase += f as f64 * step;

            let mut acc = 0.0f32;
            for (h, (&from, &to)) in self
                .previous_amps
                .iter()
                .zip(self.target_amps.iter())
                .enumerate()
            {
                if from == 0.0 && to == 0.0 {
                    continue;
                }
                let amp = from + (to - from) * t;
                acc += (self.phase * (h + 1) as f64).sin() as f32 * amp;
            }
            *sample += acc;
        }

        self.phase %= TAU;
        self.previous_f0 = Some(f0_hz);
        self.previous_amps.copy_from_slice(&self.target_amps);
    }

    /// Normalize the distribution to sum to one, drop bins at or above
    /// Nyquist, then scale by the overall amplitude
    fn set_targets(&mut self, distribution: &[f32], amplitude: f32, f0_hz: f32) {
        let nyquist = self.sample_rate / 2.0;
        for (h, target) in self.target_amps.iter_mut().enumerate() {
            let weight = distribution.get(h).copied().unwrap_or(0.0);
            *target = if (h + 1) as f32 * f0_hz >= nyquist {
                0.0
            } else {
                weight
            };
        }

        let total: f32 = self.target_amps.iter().sum();
        let scale = if total > 0.0 { amplitude / total } else { 0.0 };
        for target in &mut self.target_amps {
            *target *= scale;
        }
    }
}
