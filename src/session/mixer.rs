/// All-zero frame
pub fn silence(frame_len: usize) -> Vec<i16> {
    vec![0; frame_len]
}

/// Combine per-voice frames into one output frame.
///
/// No voices gives silence of `frame_len`; one voice passes through
/// untouched; more are averaged sample-wise over the shortest frame.
pub fn mix_voices(mut frames: Vec<Vec<i16>>, frame_len: usize) -> Vec<i16> {
    match frames.len() {
        0 => silence(frame_len),
        1 => frames.pop().unwrap_or_default(),
        _ => average_frames(&frames).unwrap_or_else(|| silence(frame_len)),
    }
}

/// `round(sum / n)` per sample, saturated to int16, over the shortest input.
/// Returns `None` when there is nothing to mix.
pub fn average_frames<T>(frames: &[Vec<T>]) -> Option<Vec<i16>>
where
    T: Copy + Into<f64>,
{
    let len = frames.iter().map(Vec::len).min()?;
    if len == 0 {
        return None;
    }
    let weight = 1.0 / frames.len() as f64;
    let mixed = (0..len)
        .map(|j| {
            let acc: f64 = frames.iter().map(|f| f[j].into() * weight).sum();
            saturate(acc.round_ties_even())
        })
        .collect();
    Some(mixed)
}

fn saturate(sample: f64) -> i16 {
    sample.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_voices_is_full_length_silence() {
        assert_eq!(mix_voices(vec![], 960), vec![0; 960]);
    }

    #[test]
    fn single_voice_passes_through_unmodified() {
        let voice: Vec<i16> = (0..960).map(|i| (i * 37 - 16_000) as i16).collect();
        assert_eq!(mix_voices(vec![voice.clone()], 960), voice);

        // Even a short frame is not padded
        assert_eq!(mix_voices(vec![vec![5, 6]], 960), vec![5, 6]);
    }

    #[test]
    fn averages_equal_frames() {
        let mixed = mix_voices(vec![vec![1000; 4], vec![3000; 4], vec![-1000; 4]], 4);
        assert_eq!(mixed, vec![1000; 4]);
    }

    #[test]
    fn rounds_half_to_even() {
        assert_eq!(mix_voices(vec![vec![1, 2, -1], vec![2, 3, -2]], 3), vec![2, 2, -2]);
        // 1/3 + 1/3 + 2/3
        assert_eq!(mix_voices(vec![vec![1], vec![1], vec![2]], 1), vec![1]);
    }

    #[test]
    fn extremes_stay_in_range() {
        let mixed = mix_voices(vec![vec![i16::MAX, i16::MIN], vec![i16::MAX, i16::MIN]], 2);
        assert_eq!(mixed, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn out_of_range_inputs_saturate() {
        let mixed = average_frames(&[vec![40_000i32, -50_000], vec![40_000, -40_000]]).unwrap();
        assert_eq!(mixed, vec![32767, -32768]);
    }

    #[test]
    fn mix_length_is_shortest_voice() {
        let mixed = mix_voices(vec![vec![10; 960], vec![20; 958], vec![30; 959]], 960);
        assert_eq!(mixed.len(), 958);
        assert!(mixed.iter().all(|s| *s == 20));
    }

    #[test]
    fn empty_voice_falls_back_to_silence() {
        assert_eq!(mix_voices(vec![vec![10; 960], vec![]], 960), vec![0; 960]);
    }
}
