use std::f32::consts::TAU;

/// White noise shaped by a fixed FIR filter.
///
/// The filter is designed once from per-band magnitudes (DC to Nyquist):
/// inverse real DFT to a zero-phase impulse response, Hann window, then
/// rotated to causal form. Filter history carries across frames.
pub struct NoiseSynth {
    taps: Vec<f32>,
    history: Vec<f32>,
    pos: usize,
    noise_state: u32,
}

impl NoiseSynth {
    pub fn new(magnitudes: &[f32], seed: u32) -> Self {
        let taps = design_filter(magnitudes);
        Self {
            history: vec![0.0; taps.len()],
            taps,
            pos: 0,
            noise_state: seed,
        }
    }

    /// Simple linear congruential generator for noise
    fn next_noise(&mut self) -> f32 {
        self.noise_state = self.noise_state.wrapping_mul(1103515245).wrapping_add(12345);
        (self.noise_state as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    /// Add one frame of filtered noise, scaled by `gain`, into `out`
    pub fn render(&mut self, gain: f32, out: &mut [f32]) {
        let n = self.taps.len();
        if n == 0 {
            return;
        }
        for sample in out.iter_mut() {
            self.pos = (self.pos + 1) % n;
            self.history[self.pos] = self.next_noise();

            let mut acc = 0.0f32;
            for (t, tap) in self.taps.iter().enumerate() {
                acc += tap * self.history[(self.pos + n - t) % n];
            }
            *sample += acc * gain;
        }
    }
}

/// Linear-phase FIR from band magnitudes; `2 * (bands - 1)` taps
pub fn design_filter(magnitudes: &[f32]) -> Vec<f32> {
    if magnitudes.len() < 2 {
        return Vec::new();
    }
    let bands = magnitudes.len();
    let n = 2 * (bands - 1);
    let last = bands - 1;

    // Zero-phase impulse response (real, even spectrum)
    let mut impulse = vec![0.0f32; n];
    for (i, value) in impulse.iter_mut().enumerate() {
        let mut acc = magnitudes[0];
        acc += if i % 2 == 0 { magnitudes[last] } else { -magnitudes[last] };
        for (k, mag) in magnitudes.iter().enumerate().take(last).skip(1) {
            acc += 2.0 * mag * (TAU * (k * i) as f32 / n as f32).cos();
        }
        *value = acc / n as f32;
    }

    // Zero-phase Hann window peaks at index 0
    for (i, value) in impulse.iter_mut().enumerate() {
        *value *= 0.5 * (1.0 + (TAU * i as f32 / n as f32).cos());
    }

    // Rotate so the peak sits mid-filter
    impulse.rotate_right(n / 2);
    impulse
}
